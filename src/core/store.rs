use std::time::{SystemTime, UNIX_EPOCH};

use hashbrown::HashMap;
use thiserror::Error;

use crate::{
    lap::{self, FormatPatch, Heat, LapSource, Pilot, PilotRun, RaceClass, RaceFormat, SavedRace},
    op::{Op, StoredOp},
    types::{ClassId, FormatId, HeatId, OpSeq, PilotId, RaceId, TimeMs},
};

/// Record-store misuse. Scoring never produces these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No such pilot.
    #[error("unknown pilot {0}")]
    UnknownPilot(PilotId),
    /// No such format.
    #[error("unknown format {0}")]
    UnknownFormat(FormatId),
    /// No such class.
    #[error("unknown class {0}")]
    UnknownClass(ClassId),
    /// No such heat.
    #[error("unknown heat {0}")]
    UnknownHeat(HeatId),
    /// No such race.
    #[error("unknown race {0}")]
    UnknownRace(RaceId),
    /// No active lap with that number.
    #[error("race {race_id} has no lap {lap_number} for pilot {pilot_id}")]
    UnknownLap {
        /// Saved race searched.
        race_id: RaceId,
        /// Pilot whose laps were searched.
        pilot_id: PilotId,
        /// Requested lap number.
        lap_number: u32,
    },
}

/// In-memory event records: pilots, formats, classes, heats and saved races.
///
/// Every mutation returns the [`StoredOp`] it appended; callers feed
/// [`Op::touched_scopes`] to the result cache.
#[derive(Debug, Default)]
pub struct RecordStore {
    pilots: HashMap<PilotId, Pilot>,
    formats: HashMap<FormatId, RaceFormat>,
    classes: HashMap<ClassId, RaceClass>,
    class_order: Vec<ClassId>,
    heats: HashMap<HeatId, Heat>,
    heat_order: Vec<HeatId>,
    races: HashMap<RaceId, SavedRace>,
    by_heat: HashMap<HeatId, Vec<RaceId>>,
    pending_ops: Vec<StoredOp>,
    next_op_seq: OpSeq,
    next_id: u32,
}

impl RecordStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            next_op_seq: 1,
            next_id: 1,
            ..Self::default()
        }
    }

    /// Adds a pilot on `team`; an empty team means none.
    pub fn add_pilot(&mut self, callsign: impl Into<String>, team: impl Into<String>) -> (PilotId, StoredOp) {
        let id = self.take_next_id();
        let pilot = Pilot {
            id,
            callsign: callsign.into(),
            team: team.into(),
        };
        self.pilots.insert(id, pilot.clone());
        (id, self.record(Op::PilotAdded { pilot }))
    }

    /// Renames a pilot or moves them to another team.
    pub fn alter_pilot(
        &mut self,
        id: PilotId,
        callsign: impl Into<String>,
        team: impl Into<String>,
    ) -> Result<((), StoredOp), StoreError> {
        let rec = self.pilots.get_mut(&id).ok_or(StoreError::UnknownPilot(id))?;
        let prev = rec.clone();
        rec.callsign = callsign.into();
        rec.team = team.into();
        let pilot = rec.clone();
        Ok(((), self.record(Op::PilotAltered { id, pilot, prev })))
    }

    /// Inserts `format` under a fresh id; the id it carries is ignored.
    pub fn add_format(&mut self, mut format: RaceFormat) -> (FormatId, StoredOp) {
        let id = self.take_next_id();
        format.id = id;
        self.formats.insert(id, format.clone());
        (id, self.record(Op::FormatAdded { format }))
    }

    /// Applies a sparse format patch.
    pub fn alter_format(&mut self, id: FormatId, patch: FormatPatch) -> Result<((), StoredOp), StoreError> {
        let rec = self.formats.get_mut(&id).ok_or(StoreError::UnknownFormat(id))?;
        let prev = rec.clone();
        patch.apply_to(rec);
        Ok(((), self.record(Op::FormatAltered { id, patch, prev })))
    }

    /// Adds a class, optionally bound to a format.
    pub fn add_class(
        &mut self,
        name: impl Into<String>,
        format_id: Option<FormatId>,
    ) -> Result<(ClassId, StoredOp), StoreError> {
        if let Some(format_id) = format_id {
            self.format(format_id).ok_or(StoreError::UnknownFormat(format_id))?;
        }
        let id = self.take_next_id();
        let class = RaceClass {
            id,
            name: name.into(),
            format_id,
        };
        self.classes.insert(id, class.clone());
        self.class_order.push(id);
        Ok((id, self.record(Op::ClassAdded { class })))
    }

    /// Adds a heat, optionally inside a class.
    pub fn add_heat(
        &mut self,
        note: Option<String>,
        class_id: Option<ClassId>,
    ) -> Result<(HeatId, StoredOp), StoreError> {
        if let Some(class_id) = class_id {
            self.class(class_id).ok_or(StoreError::UnknownClass(class_id))?;
        }
        let id = self.take_next_id();
        let heat = Heat { id, note, class_id };
        self.heats.insert(id, heat.clone());
        self.heat_order.push(id);
        Ok((id, self.record(Op::HeatAdded { heat })))
    }

    /// Moves a heat to another class. Races already saved in the heat move
    /// with it.
    pub fn reassign_heat_class(
        &mut self,
        heat_id: HeatId,
        class_id: Option<ClassId>,
    ) -> Result<((), StoredOp), StoreError> {
        if let Some(class_id) = class_id {
            self.class(class_id).ok_or(StoreError::UnknownClass(class_id))?;
        }
        let heat = self.heats.get_mut(&heat_id).ok_or(StoreError::UnknownHeat(heat_id))?;
        let prev = heat.class_id;
        heat.class_id = class_id;

        for race_id in self.by_heat.get(&heat_id).into_iter().flatten() {
            if let Some(race) = self.races.get_mut(race_id) {
                race.class_id = class_id;
            }
        }

        Ok((
            (),
            self.record(Op::HeatClassChanged {
                heat_id,
                class_id,
                prev,
            }),
        ))
    }

    /// Saves a finished race. The round is the next in the heat and the
    /// class is the heat's current class.
    pub fn save_race(
        &mut self,
        heat_id: HeatId,
        format_id: Option<FormatId>,
        start_time_ms: u64,
        runs: Vec<PilotRun>,
    ) -> Result<(RaceId, StoredOp), StoreError> {
        let class_id = self.heat(heat_id).ok_or(StoreError::UnknownHeat(heat_id))?.class_id;
        if let Some(format_id) = format_id {
            self.format(format_id).ok_or(StoreError::UnknownFormat(format_id))?;
        }
        if let Some(run) = runs.iter().find(|run| !self.pilots.contains_key(&run.pilot_id)) {
            return Err(StoreError::UnknownPilot(run.pilot_id));
        }

        let id = self.take_next_id();
        let round_id = self.next_round(heat_id);
        self.races.insert(
            id,
            SavedRace {
                id,
                heat_id,
                round_id,
                class_id,
                format_id,
                start_time_ms,
                runs,
            },
        );
        self.by_heat.entry(heat_id).or_default().push(id);

        Ok((
            id,
            self.record(Op::RaceSaved {
                race_id: id,
                heat_id,
                class_id,
            }),
        ))
    }

    /// Appends a lap to a saved run, numbered after its last active lap.
    pub fn add_saved_lap(
        &mut self,
        race_id: RaceId,
        pilot_id: PilotId,
        timestamp_ms: TimeMs,
        source: LapSource,
    ) -> Result<(u32, StoredOp), StoreError> {
        let race = self.races.get_mut(&race_id).ok_or(StoreError::UnknownRace(race_id))?;
        let run = race
            .runs
            .iter_mut()
            .find(|run| run.pilot_id == pilot_id)
            .ok_or(StoreError::UnknownPilot(pilot_id))?;
        let appended = lap::append_lap(&mut run.laps, pilot_id, run.node_index, timestamp_ms, source);
        let lap_number = appended.lap_number;
        Ok((
            lap_number,
            self.record(Op::LapAdded {
                race_id,
                pilot_id,
                lap_number,
            }),
        ))
    }

    /// Deletes a saved lap and resequences the run.
    pub fn delete_lap(
        &mut self,
        race_id: RaceId,
        pilot_id: PilotId,
        lap_number: u32,
    ) -> Result<((), StoredOp), StoreError> {
        let missing = StoreError::UnknownLap {
            race_id,
            pilot_id,
            lap_number,
        };
        let race = self.races.get_mut(&race_id).ok_or(StoreError::UnknownRace(race_id))?;
        let run = race
            .runs
            .iter_mut()
            .find(|run| run.pilot_id == pilot_id)
            .ok_or_else(|| missing.clone())?;
        if !lap::delete_lap(&mut run.laps, lap_number) {
            return Err(missing);
        }
        Ok((
            (),
            self.record(Op::LapDeleted {
                race_id,
                pilot_id,
                lap_number,
            }),
        ))
    }

    /// Moves a saved race to another heat, taking that heat's class.
    pub fn reassign_race(&mut self, race_id: RaceId, heat_id: HeatId) -> Result<((), StoredOp), StoreError> {
        let class_id = self.heat(heat_id).ok_or(StoreError::UnknownHeat(heat_id))?.class_id;
        let race = self.races.get_mut(&race_id).ok_or(StoreError::UnknownRace(race_id))?;
        let prev_heat = race.heat_id;
        let prev_class = race.class_id;
        race.heat_id = heat_id;
        race.class_id = class_id;

        if let Some(ids) = self.by_heat.get_mut(&prev_heat) {
            ids.retain(|id| *id != race_id);
        }
        let round_id = self.next_round(heat_id);
        self.by_heat.entry(heat_id).or_default().push(race_id);
        if let Some(race) = self.races.get_mut(&race_id) {
            race.round_id = round_id;
        }

        Ok((
            (),
            self.record(Op::RaceReassigned {
                race_id,
                heat_id,
                prev_heat,
                class_id,
                prev_class,
            }),
        ))
    }

    /// Pilot by id.
    pub fn pilot(&self, id: PilotId) -> Option<&Pilot> {
        self.pilots.get(&id)
    }

    /// Format by id.
    pub fn format(&self, id: FormatId) -> Option<&RaceFormat> {
        self.formats.get(&id)
    }

    /// Class by id.
    pub fn class(&self, id: ClassId) -> Option<&RaceClass> {
        self.classes.get(&id)
    }

    /// Classes in creation order.
    pub fn classes(&self) -> Vec<&RaceClass> {
        self.class_order.iter().filter_map(|id| self.classes.get(id)).collect()
    }

    /// Heat by id.
    pub fn heat(&self, id: HeatId) -> Option<&Heat> {
        self.heats.get(&id)
    }

    /// Heats in creation order.
    pub fn heats(&self) -> Vec<&Heat> {
        self.heat_order.iter().filter_map(|id| self.heats.get(id)).collect()
    }

    /// Heats of a class in creation order.
    pub fn heats_by_class(&self, class_id: ClassId) -> Vec<&Heat> {
        self.heats()
            .into_iter()
            .filter(|heat| heat.class_id == Some(class_id))
            .collect()
    }

    /// Heats outside any class.
    pub fn unclassified_heats(&self) -> Vec<&Heat> {
        self.heats().into_iter().filter(|heat| heat.class_id.is_none()).collect()
    }

    /// Saved race by id.
    pub fn race(&self, id: RaceId) -> Option<&SavedRace> {
        self.races.get(&id)
    }

    /// Races of a heat in round order.
    pub fn races_by_heat(&self, heat_id: HeatId) -> Vec<&SavedRace> {
        self.by_heat
            .get(&heat_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.races.get(id))
            .collect()
    }

    /// Saved races the pilot flew in.
    pub fn races_with_pilot(&self, pilot_id: PilotId) -> Vec<RaceId> {
        self.race_ids_where(|race| race.run(pilot_id).is_some())
    }

    /// Saved races flown under the format.
    pub fn races_with_format(&self, format_id: FormatId) -> Vec<RaceId> {
        self.race_ids_where(|race| race.format_id == Some(format_id))
    }

    /// Takes the ops appended since the last drain.
    pub fn drain_pending_ops(&mut self) -> Vec<StoredOp> {
        std::mem::take(&mut self.pending_ops)
    }

    /// Latest op seq.
    pub fn latest_op_seq(&self) -> OpSeq {
        self.next_op_seq.saturating_sub(1)
    }

    fn race_ids_where(&self, keep: impl Fn(&SavedRace) -> bool) -> Vec<RaceId> {
        let mut ids: Vec<RaceId> = self.races.values().filter(|race| keep(race)).map(|race| race.id).collect();
        ids.sort_unstable();
        ids
    }

    fn record(&mut self, op: Op) -> StoredOp {
        let stored = StoredOp {
            seq: self.take_next_op_seq(),
            ts_ms: now_ms(),
            op,
        };
        self.pending_ops.push(stored.clone());
        stored
    }

    /// Rounds only grow within a heat, so a race moved out leaves a gap
    /// rather than a duplicate.
    fn next_round(&self, heat_id: HeatId) -> u32 {
        self.by_heat
            .get(&heat_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.races.get(id))
            .map(|race| race.round_id)
            .max()
            .unwrap_or(0)
            + 1
    }

    fn take_next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn take_next_op_seq(&mut self) -> OpSeq {
        let seq = self.next_op_seq;
        self.next_op_seq += 1;
        seq
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
