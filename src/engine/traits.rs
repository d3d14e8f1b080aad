//! Seams between the scoring engine and the layers around it: the record
//! source behind the cache, live race signals, and pluggable points and
//! class-ranking methods.

use std::sync::Arc;

use crate::{
    lap::Heat,
    leaderboard::Leaderboard,
    types::{ClassId, HeatId, NodeIndex, RaceStatus, Scope, TimeMs},
};

use super::points::Ranking;

/// How a scope's leaderboard is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildPlan {
    /// Nothing has been flown in this scope.
    NoData,
    /// Rank raw laps directly.
    Rank,
    /// Merge the cached leaderboards of these child scopes.
    Merge(Vec<Scope>),
}

/// Record-layer seam used by the result cache.
///
/// Implementations read records synchronously; the cache owns every
/// version token and never lets a source write cache state.
pub trait ResultsSource: Send + Sync + 'static {
    /// Whether `scope` is ranked from laps, merged from children or empty.
    fn plan(&self, scope: Scope) -> BuildPlan;

    /// Ranks a [`BuildPlan::Rank`] scope. `None` means no data.
    fn rank(&self, scope: Scope, previous: Option<&Leaderboard>) -> Option<Leaderboard>;

    /// Scopes whose results include `scope`.
    fn parents(&self, scope: Scope) -> Vec<Scope>;

    /// Custom class ranking over per-heat results, oldest heat first.
    fn rank_class(&self, _class_id: ClassId, _heats: &[(HeatId, Arc<Leaderboard>)]) -> Option<Ranking> {
        None
    }
}

/// Live race signals consumed by the win-condition evaluator.
pub trait RaceSignals {
    /// Current race status.
    fn status(&self) -> RaceStatus;
    /// False once the nominal race time has expired.
    fn timer_running(&self) -> bool;
    /// The seat is mid-crossing; its next lap may still land.
    fn crossing_in_progress(&self, node: NodeIndex) -> bool;
    /// The pilot on `node` is done flying.
    fn has_finished(&self, node: NodeIndex) -> bool;
    /// Every active seat has finished.
    fn all_finished(&self) -> bool;
    /// Nominal race length; `None` for unlimited races.
    fn nominal_ms(&self) -> Option<TimeMs>;
    /// Timestamp of the seat's latest crossing.
    fn last_crossing_ms(&self, node: NodeIndex) -> Option<TimeMs>;
    /// The seat's last `n` counted lap times, oldest first.
    fn recent_lap_times(&self, node: NodeIndex, n: usize) -> Vec<TimeMs>;
}

/// Awards points on a built race leaderboard.
pub trait PointsMethod: Send + Sync {
    /// Registry key.
    fn name(&self) -> &str;
    /// Writes each row's `points`.
    fn apply(&self, leaderboard: &mut Leaderboard);
}

/// Ranks a class from its heats' results.
pub trait ClassRankMethod: Send + Sync {
    /// Registry key.
    fn name(&self) -> &str;
    /// `heats` is ordered oldest first.
    fn rank(&self, heats: &[(&Heat, &Leaderboard)]) -> Ranking;
}
