//! Lap, pilot, format and saved-race records.

use serde::{Deserialize, Serialize};

use crate::types::{
    ClassId, FormatId, HeatId, NodeIndex, PilotId, RaceId, RoundId, StartBehavior, TeamMode,
    TimeMs, WinCondition,
};

/// Where a lap came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LapSource {
    /// Detected by a timer node.
    #[default]
    Realtime,
    /// Entered by the race director.
    Manual,
    /// Produced by a marshaling recalculation.
    Recalc,
    /// Mirrored from another timer.
    Automatic,
}

/// One gate crossing. Lap 0 is the holeshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lap {
    /// Pilot credited with the lap.
    pub pilot_id: PilotId,
    /// Node that saw the crossing.
    pub node_index: NodeIndex,
    /// Position in the non-deleted sequence.
    pub lap_number: u32,
    /// Crossing time relative to race start.
    pub timestamp_ms: TimeMs,
    /// Time since the previous non-deleted crossing (or race start).
    pub lap_time_ms: TimeMs,
    /// Origin of the crossing.
    pub source: LapSource,
    /// Soft-deleted by a correction.
    pub deleted: bool,
}

/// Appends a crossing to `laps`, numbering it after the last active lap.
pub fn append_lap(
    laps: &mut Vec<Lap>,
    pilot_id: PilotId,
    node_index: NodeIndex,
    timestamp_ms: TimeMs,
    source: LapSource,
) -> Lap {
    let last = laps.iter().rev().find(|lap| !lap.deleted);
    let (lap_number, lap_time_ms) = match last {
        Some(prev) => (prev.lap_number + 1, timestamp_ms - prev.timestamp_ms),
        None => (0, timestamp_ms),
    };

    let lap = Lap {
        pilot_id,
        node_index,
        lap_number,
        timestamp_ms,
        lap_time_ms,
        source,
        deleted: false,
    };
    laps.push(lap.clone());
    lap
}

/// Soft-deletes the active lap numbered `lap_number`, then renumbers the
/// remaining laps and recomputes the following lap's time.
///
/// Returns `false` when no such active lap exists.
pub fn delete_lap(laps: &mut [Lap], lap_number: u32) -> bool {
    let Some(target) = laps
        .iter_mut()
        .find(|lap| !lap.deleted && lap.lap_number == lap_number)
    else {
        return false;
    };
    target.deleted = true;
    resequence(laps);
    true
}

/// Restores contiguous numbering and lap times over the active laps.
pub fn resequence(laps: &mut [Lap]) {
    let mut prev_ts: Option<TimeMs> = None;
    let mut number = 0;
    for lap in laps.iter_mut().filter(|lap| !lap.deleted) {
        lap.lap_number = number;
        lap.lap_time_ms = match prev_ts {
            Some(ts) => lap.timestamp_ms - ts,
            None => lap.timestamp_ms,
        };
        prev_ts = Some(lap.timestamp_ms);
        number += 1;
    }
}

/// Active (non-deleted) laps in crossing order.
pub fn active_laps(laps: &[Lap]) -> Vec<Lap> {
    laps.iter().filter(|lap| !lap.deleted).cloned().collect()
}

/// Pilot record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pilot {
    /// Stable pilot identifier.
    pub id: PilotId,
    /// Display callsign.
    pub callsign: String,
    /// Team name used by team racing.
    pub team: String,
}

/// Race format record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceFormat {
    /// Stable format identifier.
    pub id: FormatId,
    /// Display name.
    pub name: String,
    /// Nominal race length; `None` for unlimited.
    pub race_time_ms: Option<TimeMs>,
    /// Holeshot handling.
    pub start_behavior: StartBehavior,
    /// Winner rule.
    pub win_condition: WinCondition,
    /// Target for `FIRST_TO_LAP_X`.
    pub number_laps_win: u32,
    /// Individual, team or co-op scoring.
    pub team_mode: TeamMode,
    /// Overrides the global consecutive window size.
    pub consecutives_count: Option<usize>,
}

impl RaceFormat {
    /// A two-minute most-progress holeshot format.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            race_time_ms: Some(120_000),
            start_behavior: StartBehavior::Holeshot,
            win_condition: WinCondition::MostProgress,
            number_laps_win: 0,
            team_mode: TeamMode::Individual,
            consecutives_count: None,
        }
    }
}

/// Sparse patch where each `Some` field overwrites the format value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FormatPatch {
    /// Optional replacement name.
    pub name: Option<String>,
    /// Optional replacement race length.
    pub race_time_ms: Option<Option<TimeMs>>,
    /// Optional replacement start behavior.
    pub start_behavior: Option<StartBehavior>,
    /// Optional replacement win condition.
    pub win_condition: Option<WinCondition>,
    /// Optional replacement lap target.
    pub number_laps_win: Option<u32>,
    /// Optional replacement team mode.
    pub team_mode: Option<TeamMode>,
    /// Optional replacement window size override.
    pub consecutives_count: Option<Option<usize>>,
}

impl FormatPatch {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// True when the patch changes anything that feeds scoring.
    pub fn affects_results(&self) -> bool {
        self.race_time_ms.is_some()
            || self.start_behavior.is_some()
            || self.win_condition.is_some()
            || self.team_mode.is_some()
            || self.consecutives_count.is_some()
    }

    /// Applies this patch in place to `format`.
    pub fn apply_to(&self, format: &mut RaceFormat) {
        if let Some(v) = &self.name {
            format.name = v.clone();
        }
        if let Some(v) = self.race_time_ms {
            format.race_time_ms = v;
        }
        if let Some(v) = self.start_behavior {
            format.start_behavior = v;
        }
        if let Some(v) = self.win_condition {
            format.win_condition = v;
        }
        if let Some(v) = self.number_laps_win {
            format.number_laps_win = v;
        }
        if let Some(v) = self.team_mode {
            format.team_mode = v;
        }
        if let Some(v) = self.consecutives_count {
            format.consecutives_count = v;
        }
    }
}

/// Heat record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heat {
    /// Stable heat identifier.
    pub id: HeatId,
    /// Optional display note.
    pub note: Option<String>,
    /// Owning class, if any.
    pub class_id: Option<ClassId>,
}

impl Heat {
    /// Note when present, else `Heat <id>`.
    pub fn display_name(&self) -> String {
        match &self.note {
            Some(note) if !note.is_empty() => note.clone(),
            _ => format!("Heat {}", self.id),
        }
    }
}

/// Race class record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceClass {
    /// Stable class identifier.
    pub id: ClassId,
    /// Display name.
    pub name: String,
    /// Format every heat of the class runs.
    pub format_id: Option<FormatId>,
}

/// One pilot's laps in a saved race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PilotRun {
    /// Pilot flown.
    pub pilot_id: PilotId,
    /// Seat used.
    pub node_index: NodeIndex,
    /// All laps, deleted ones included.
    pub laps: Vec<Lap>,
}

/// Saved race meta plus its laps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedRace {
    /// Stable race identifier.
    pub id: RaceId,
    /// Heat the race belongs to.
    pub heat_id: HeatId,
    /// Round number within the heat.
    pub round_id: RoundId,
    /// Class copied from the heat when saved.
    pub class_id: Option<ClassId>,
    /// Format flown.
    pub format_id: Option<FormatId>,
    /// Wall-clock start in milliseconds since epoch.
    pub start_time_ms: u64,
    /// Per-pilot laps.
    pub runs: Vec<PilotRun>,
}

impl SavedRace {
    /// Run for `pilot_id`, if they flew this race.
    pub fn run(&self, pilot_id: PilotId) -> Option<&PilotRun> {
        self.runs.iter().find(|run| run.pilot_id == pilot_id)
    }
}
