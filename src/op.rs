//! Record mutation model.

use serde::{Deserialize, Serialize};

use crate::{
    core::store::RecordStore,
    lap::{FormatPatch, Heat, Pilot, RaceClass, RaceFormat},
    types::{ClassId, FormatId, HeatId, OpSeq, PilotId, RaceId, Scope},
};

/// Immutable record mutation, as appended to the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Insert a pilot.
    PilotAdded {
        /// Inserted record.
        pilot: Pilot,
    },
    /// Replace a pilot record (callsign or team change).
    PilotAltered {
        /// Pilot mutated.
        id: PilotId,
        /// New record.
        pilot: Pilot,
        /// Record before the change.
        prev: Pilot,
    },
    /// Insert a race format.
    FormatAdded {
        /// Inserted record.
        format: RaceFormat,
    },
    /// Patch a race format.
    FormatAltered {
        /// Format mutated.
        id: FormatId,
        /// Forward patch.
        patch: FormatPatch,
        /// Record before the change.
        prev: RaceFormat,
    },
    /// Insert a class.
    ClassAdded {
        /// Inserted record.
        class: RaceClass,
    },
    /// Insert a heat.
    HeatAdded {
        /// Inserted record.
        heat: Heat,
    },
    /// Move a heat to another class.
    HeatClassChanged {
        /// Heat moved.
        heat_id: HeatId,
        /// New class.
        class_id: Option<ClassId>,
        /// Class before the move.
        prev: Option<ClassId>,
    },
    /// A live race was saved.
    RaceSaved {
        /// New race.
        race_id: RaceId,
        /// Heat it was flown in.
        heat_id: HeatId,
        /// Class of that heat at save time.
        class_id: Option<ClassId>,
    },
    /// Marshaling moved a saved race to another heat.
    RaceReassigned {
        /// Race moved.
        race_id: RaceId,
        /// Destination heat.
        heat_id: HeatId,
        /// Heat before the move.
        prev_heat: HeatId,
        /// Destination class.
        class_id: Option<ClassId>,
        /// Class before the move.
        prev_class: Option<ClassId>,
    },
    /// A lap was appended to a saved race.
    LapAdded {
        /// Race corrected.
        race_id: RaceId,
        /// Pilot credited.
        pilot_id: PilotId,
        /// Number assigned to the new lap.
        lap_number: u32,
    },
    /// A saved lap was deleted and the run resequenced.
    LapDeleted {
        /// Race corrected.
        race_id: RaceId,
        /// Pilot whose lap was removed.
        pilot_id: PilotId,
        /// Number the lap had before deletion.
        lap_number: u32,
    },
}

impl Op {
    /// Scopes whose results this op changes directly.
    ///
    /// Ancestors (heat, class, event) are left to the cache's dependency
    /// walk, except where the op moves a record between parents: both the
    /// old and the new parent are listed, since the walk only sees the
    /// record's current placement.
    pub fn touched_scopes(&self, store: &RecordStore) -> Vec<Scope> {
        match self {
            Op::PilotAdded { .. } | Op::FormatAdded { .. } | Op::ClassAdded { .. } | Op::HeatAdded { .. } => {
                Vec::new()
            }
            Op::PilotAltered { id, pilot, prev } => {
                if pilot.callsign == prev.callsign && pilot.team == prev.team {
                    return Vec::new();
                }
                let mut scopes = vec![Scope::Current];
                scopes.extend(store.races_with_pilot(*id).into_iter().map(Scope::Race));
                scopes
            }
            Op::FormatAltered { id, patch, .. } => {
                if !patch.affects_results() {
                    return Vec::new();
                }
                let mut scopes = vec![Scope::Current];
                scopes.extend(store.races_with_format(*id).into_iter().map(Scope::Race));
                scopes
            }
            Op::HeatClassChanged {
                heat_id,
                class_id,
                prev,
            } => {
                let mut scopes = vec![Scope::Heat(*heat_id)];
                scopes.extend(prev.map(Scope::Class));
                scopes.extend(class_id.map(Scope::Class));
                scopes.push(Scope::Event);
                scopes
            }
            Op::RaceSaved { race_id, .. } => vec![Scope::Race(*race_id)],
            Op::RaceReassigned {
                race_id,
                heat_id,
                prev_heat,
                class_id,
                prev_class,
            } => {
                let mut scopes = vec![Scope::Race(*race_id), Scope::Heat(*prev_heat), Scope::Heat(*heat_id)];
                scopes.extend(prev_class.map(Scope::Class));
                scopes.extend(class_id.map(Scope::Class));
                scopes.push(Scope::Event);
                scopes
            }
            Op::LapAdded { race_id, .. } | Op::LapDeleted { race_id, .. } => vec![Scope::Race(*race_id)],
        }
    }
}

/// Journal row metadata plus operation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOp {
    /// Monotonic operation sequence.
    pub seq: OpSeq,
    /// Operation timestamp in milliseconds.
    pub ts_ms: u64,
    /// Operation body.
    pub op: Op,
}
