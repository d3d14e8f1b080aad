//! Incremental roll-up: combines child leaderboards instead of rescanning
//! laps.

use hashbrown::HashMap;

use crate::{
    leaderboard::{Leaderboard, LeaderboardMeta, Row},
    types::{PilotId, PrimaryLeaderboard, TimeMs, WinCondition},
};

use super::ranking::{rank_rows, window_beats};

/// Merges child leaderboards into one ranked leaderboard.
///
/// Rows are keyed by pilot. A pilot seen in a single child is copied
/// through unchanged; otherwise counts and totals are summed and the best
/// lap and window are kept along with their sources. Meta fields that
/// disagree between children fall back to safe defaults, with
/// `consecutives_count` falling back to `default_consecutives`.
pub fn merge_leaderboards(
    children: &[&Leaderboard],
    default_consecutives: usize,
    previous: Option<&Leaderboard>,
) -> Leaderboard {
    let meta = merge_meta(children, default_consecutives);

    let mut order: Vec<PilotId> = Vec::new();
    let mut merged: HashMap<PilotId, (Row, usize)> = HashMap::new();

    for child in children {
        for row in &child.by_race_time {
            match merged.get_mut(&row.pilot_id) {
                Some((acc, seen)) => {
                    accumulate(acc, row);
                    *seen += 1;
                }
                None => {
                    order.push(row.pilot_id);
                    merged.insert(row.pilot_id, (row.clone(), 1));
                }
            }
        }
    }

    let rows = order
        .into_iter()
        .filter_map(|id| merged.remove(&id))
        .map(|(mut row, seen)| {
            if seen > 1 {
                finish_merged(&mut row);
            }
            row
        })
        .collect();

    rank_rows(rows, meta, previous)
}

fn accumulate(acc: &mut Row, row: &Row) {
    acc.laps += row.laps;
    acc.starts += row.starts;
    acc.total_time_raw += row.total_time_raw;
    acc.total_time_laps_raw += row.total_time_laps_raw;
    acc.points = match (acc.points, row.points) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    };

    if row.fastest_lap_raw > 0 && (acc.fastest_lap_raw <= 0 || row.fastest_lap_raw < acc.fastest_lap_raw) {
        acc.fastest_lap_raw = row.fastest_lap_raw;
        acc.fastest_lap_source = row.fastest_lap_source.clone();
    }

    if window_beats(
        row.consecutives_base,
        row.consecutives_raw,
        acc.consecutives_base,
        acc.consecutives_raw,
    ) {
        acc.consecutives_raw = row.consecutives_raw;
        acc.consecutives_base = row.consecutives_base;
        acc.consecutives_lap_start = row.consecutives_lap_start;
        acc.consecutives_source = row.consecutives_source.clone();
    }
}

fn finish_merged(row: &mut Row) {
    row.average_lap_raw = if row.laps > 0 {
        row.total_time_laps_raw / TimeMs::from(row.laps)
    } else {
        0
    };
    row.node = None;
    row.last_lap_raw = None;
    row.time_behind_raw = None;
}

fn merge_meta(children: &[&Leaderboard], default_consecutives: usize) -> LeaderboardMeta {
    let metas: Vec<&LeaderboardMeta> = children.iter().map(|lb| &lb.meta).collect();

    LeaderboardMeta {
        primary_leaderboard: agreed(&metas, |m| m.primary_leaderboard).unwrap_or(PrimaryLeaderboard::ByRaceTime),
        win_condition: agreed(&metas, |m| m.win_condition).unwrap_or(WinCondition::None),
        team_racing_mode: agreed(&metas, |m| m.team_racing_mode).unwrap_or(false),
        start_behavior: agreed(&metas, |m| m.start_behavior).flatten(),
        consecutives_count: agreed(&metas, |m| m.consecutives_count).unwrap_or(default_consecutives),
        fastest_race_lap_data: None,
        primary_points: metas.iter().any(|m| m.primary_points),
    }
}

/// The shared value of `field`, or `None` when children disagree or there
/// are none.
fn agreed<T: PartialEq>(metas: &[&LeaderboardMeta], field: impl Fn(&LeaderboardMeta) -> T) -> Option<T> {
    let mut values = metas.iter().map(|m| field(m));
    let first = values.next()?;
    values.all(|v| v == first).then_some(first)
}
