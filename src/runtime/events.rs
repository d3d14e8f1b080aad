//! Runtime event stream payloads.

use crate::{
    engine::win::WinResult,
    lap::Lap,
    types::{HeatId, NodeIndex, RaceId, Scope},
};

/// Events emitted from the single-writer race-control loop.
#[derive(Debug, Clone, PartialEq)]
pub enum RaceEvent {
    /// A crossing was recorded on a live seat.
    LapRecorded {
        /// Seat.
        node: NodeIndex,
        /// The lap as numbered.
        lap: Lap,
    },
    /// A live lap was deleted.
    LapDeleted {
        /// Seat.
        node: NodeIndex,
        /// Number the lap had.
        lap_number: u32,
    },
    /// Cached results went stale.
    ResultsInvalidated {
        /// Every scope invalidated, dependents included.
        scopes: Vec<Scope>,
    },
    /// The race outcome changed.
    WinStatusChanged {
        /// Outcome now in force.
        result: WinResult,
    },
    /// The live race was saved.
    RaceSaved {
        /// New race.
        race_id: RaceId,
        /// Heat it belongs to.
        heat_id: HeatId,
    },
    /// Persistence has written this many cache entries in total.
    CachePersisted {
        /// Running count of entries written.
        entries: u64,
    },
}
