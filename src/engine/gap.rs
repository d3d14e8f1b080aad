//! Gap projection for on-screen display overlays.

use serde::{Deserialize, Serialize};

use crate::{
    leaderboard::{Leaderboard, Row},
    types::{NodeIndex, TimeMs, WinCondition},
};

/// The seat the overlay is drawn for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapCurrent {
    /// Seat.
    pub node: NodeIndex,
    /// Position in the primary view.
    pub position: u32,
    /// Callsign.
    pub callsign: String,
    /// Counted laps; `None` while only the holeshot is in.
    pub lap_number: Option<u32>,
    /// Latest lap, or the holeshot time before the first counted lap.
    pub last_lap_ms: Option<TimeMs>,
    /// Race time.
    pub total_time_ms: TimeMs,
    /// Counted-lap time.
    pub total_time_laps_ms: TimeMs,
    /// Best window.
    pub consecutives_ms: TimeMs,
    /// The latest lap is this pilot's best.
    pub is_best_lap: bool,
}

/// A competitor ahead, with the split to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapPeer {
    /// Their seat.
    pub node: Option<NodeIndex>,
    /// Their position.
    pub position: u32,
    /// Their callsign.
    pub callsign: String,
    /// Time between the current pilot and them on the ranked metric.
    pub split_ms: TimeMs,
    /// Their counted laps.
    pub laps: u32,
    /// Their latest lap, or their holeshot time.
    pub last_lap_ms: Option<TimeMs>,
    /// Their race time.
    pub total_time_ms: TimeMs,
}

/// Rank and split information for one seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapInfo {
    /// Winner rule the splits are measured on.
    pub win_condition: WinCondition,
    /// The seat itself.
    pub current: GapCurrent,
    /// The next faster competitor, or the pilot's own best when leading a
    /// time-metric race.
    pub next_rank: Option<GapPeer>,
    /// The leader, shown from third place down.
    pub first_rank: Option<GapPeer>,
}

/// Projects `leaderboard` for the pilot on `node`. `None` when the seat is
/// not on the leaderboard.
pub fn gap_info(leaderboard: &Leaderboard, node: NodeIndex) -> Option<GapInfo> {
    let view = leaderboard.primary();
    let condition = leaderboard.meta.win_condition;
    let index = view.iter().position(|row| row.node == Some(node))?;
    let row = &view[index];

    let next_rank = if row.position > 1 {
        let ahead = &view[index - 1];
        split_to(row, ahead, condition).map(|split| peer(ahead, split))
    } else {
        own_best_split(row, condition).map(|split| peer(row, split))
    };

    let first_rank = if row.position > 2 {
        let leader = &view[0];
        split_to(row, leader, condition).map(|split| peer(leader, split))
    } else {
        None
    };

    let is_best_lap = row.laps > 0 && row.fastest_lap_raw > 0 && row.last_lap_raw == Some(row.fastest_lap_raw);
    Some(GapInfo {
        win_condition: condition,
        current: GapCurrent {
            node,
            position: row.position,
            callsign: row.callsign.clone(),
            lap_number: (row.laps > 0).then_some(row.laps),
            last_lap_ms: shown_last_lap(row),
            total_time_ms: row.total_time_raw,
            total_time_laps_ms: row.total_time_laps_raw,
            consecutives_ms: row.consecutives_raw,
            is_best_lap,
        },
        next_rank,
        first_rank,
    })
}

fn split_to(row: &Row, ahead: &Row, condition: WinCondition) -> Option<TimeMs> {
    if ahead.total_time_raw == 0 {
        return None;
    }
    let split = match condition {
        WinCondition::FastestConsecutive => {
            (ahead.consecutives_raw != 0).then(|| row.consecutives_raw - ahead.consecutives_raw)
        }
        WinCondition::FastestLap => {
            if ahead.fastest_lap_raw != 0 {
                row.last_lap_raw.map(|last| last - ahead.fastest_lap_raw)
            } else {
                None
            }
        }
        _ => Some(row.total_time_raw - ahead.total_time_raw),
    };
    split.filter(|s| *s != 0)
}

fn own_best_split(row: &Row, condition: WinCondition) -> Option<TimeMs> {
    if !matches!(condition, WinCondition::FastestLap | WinCondition::FastestConsecutive) || row.fastest_lap_raw == 0 {
        return None;
    }
    row.last_lap_raw
        .filter(|last| *last > row.fastest_lap_raw)
        .map(|last| last - row.fastest_lap_raw)
}

fn shown_last_lap(row: &Row) -> Option<TimeMs> {
    if row.laps > 0 {
        row.last_lap_raw
    } else {
        Some(row.total_time_raw)
    }
}

fn peer(row: &Row, split_ms: TimeMs) -> GapPeer {
    GapPeer {
        node: row.node,
        position: row.position,
        callsign: row.callsign.clone(),
        split_ms,
        laps: row.laps,
        last_lap_ms: shown_last_lap(row),
        total_time_ms: row.total_time_raw,
    }
}
