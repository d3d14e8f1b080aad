//! Ranking Engine: per-pilot lap accounting, three sort orders and
//! competition ranking.

use std::cmp::Reverse;

use hashbrown::HashMap;

use crate::{
    lap::{Lap, Pilot, RaceFormat},
    leaderboard::{FastestRaceLap, Leaderboard, LeaderboardMeta, Row, ScoreSource, format_time_ms},
    types::{NodeIndex, PrimaryLeaderboard, StartBehavior, TimeMs},
};

/// One pilot's laps from one race.
#[derive(Debug, Clone)]
pub struct RunInput {
    /// Laps as recorded, deleted ones included.
    pub laps: Vec<Lap>,
    /// Holeshot handling of the race flown.
    pub start_behavior: StartBehavior,
    /// Attribution attached to best laps and windows from this run.
    pub source: Option<ScoreSource>,
}

/// Everything known about one pilot within a scope.
#[derive(Debug, Clone)]
pub struct PilotInput {
    /// Pilot record.
    pub pilot: Pilot,
    /// Seat, when the scope is a single race.
    pub node: Option<NodeIndex>,
    /// Races flown within the scope.
    pub runs: Vec<RunInput>,
}

/// Input to [`build_leaderboard`].
#[derive(Debug, Clone)]
pub struct RankingInput {
    /// Pilots in display order; ties keep this order.
    pub pilots: Vec<PilotInput>,
    /// Scoring context; `fastest_race_lap_data` is recomputed.
    pub meta: LeaderboardMeta,
    /// Live scope: fills `last_lap_raw` and `time_behind_raw`.
    pub live: bool,
}

/// Implemented by anything ranked with competition ranking.
pub(crate) trait Ranked {
    fn position(&self) -> u32;
    fn set_position(&mut self, position: u32);
}

impl Ranked for Row {
    fn position(&self) -> u32 {
        self.position
    }

    fn set_position(&mut self, position: u32) {
        self.position = position;
    }
}

/// Meta for a scope flown under `format`.
pub fn meta_for_format(format: Option<&RaceFormat>, default_consecutives: usize) -> LeaderboardMeta {
    let Some(format) = format else {
        return LeaderboardMeta::fallback(default_consecutives);
    };
    LeaderboardMeta {
        primary_leaderboard: PrimaryLeaderboard::for_condition(format.win_condition),
        win_condition: format.win_condition,
        team_racing_mode: format.team_mode.is_team(),
        start_behavior: Some(format.start_behavior),
        consecutives_count: format.consecutives_count.unwrap_or(default_consecutives),
        fastest_race_lap_data: None,
        primary_points: false,
    }
}

/// Scores every pilot and ranks the three views.
///
/// `previous` is the last leaderboard built for the same scope; its
/// fastest-lap announcement is reused when unchanged.
pub fn build_leaderboard(input: &RankingInput, previous: Option<&Leaderboard>) -> Leaderboard {
    let k = input.meta.consecutives_count.max(1);
    let mut rows: Vec<Row> = input
        .pilots
        .iter()
        .map(|pilot| score_pilot(pilot, k, input.live))
        .collect();

    if input.live {
        apply_time_behind(&mut rows, &input.pilots);
    }

    rank_rows(rows, input.meta.clone(), previous)
}

/// Sorts `rows` into the three views and assigns positions.
pub fn rank_rows(rows: Vec<Row>, meta: LeaderboardMeta, previous: Option<&Leaderboard>) -> Leaderboard {
    let k = meta.consecutives_count as u32;
    let staggered = meta.start_behavior == Some(StartBehavior::Staggered);

    let mut by_race_time = rows.clone();
    by_race_time.sort_by_key(|r| (Reverse(r.laps), time_key(race_time(r, staggered))));
    assign_positions(&mut by_race_time, |a, b| {
        a.laps == b.laps && race_time(a, staggered) == race_time(b, staggered)
    });

    let mut by_fastest_lap = rows.clone();
    by_fastest_lap.sort_by_key(|r| (time_key(r.fastest_lap_raw), time_key(r.total_time_raw)));
    assign_positions(&mut by_fastest_lap, |a, b| a.fastest_lap_raw == b.fastest_lap_raw);

    let mut by_consecutives = rows;
    by_consecutives.sort_by_key(|r| {
        (
            Reverse(r.consecutives_base),
            time_key(r.consecutives_raw),
            Reverse(r.laps),
            time_key(r.total_time_raw),
        )
    });
    assign_positions(&mut by_consecutives, |a, b| {
        a.consecutives_base == b.consecutives_base
            && a.consecutives_raw == b.consecutives_raw
            && (b.consecutives_base >= k || (a.laps == b.laps && a.total_time_raw == b.total_time_raw))
    });

    let fastest_race_lap_data = fastest_race_lap(&by_fastest_lap, previous);
    Leaderboard {
        by_race_time,
        by_fastest_lap,
        by_consecutives,
        meta: LeaderboardMeta {
            fastest_race_lap_data,
            ..meta
        },
    }
}

/// Non-positive times sort last.
pub(crate) fn time_key(value: TimeMs) -> TimeMs {
    if value > 0 { value } else { TimeMs::MAX }
}

/// Competition ranking: equal neighbours share the earlier position, the
/// next distinct row takes its own 1-based index.
pub(crate) fn assign_positions<T: Ranked>(rows: &mut [T], same_rank: impl Fn(&T, &T) -> bool) {
    for i in 0..rows.len() {
        let position = if i > 0 && same_rank(&rows[i - 1], &rows[i]) {
            rows[i - 1].position()
        } else {
            i as u32 + 1
        };
        rows[i].set_position(position);
    }
}

/// True when window `(base_a, raw_a)` beats `(base_b, raw_b)`: more laps
/// first, then the smaller sum.
pub(crate) fn window_beats(base_a: u32, raw_a: TimeMs, base_b: u32, raw_b: TimeMs) -> bool {
    base_a > base_b || (base_a == base_b && time_key(raw_a) < time_key(raw_b))
}

fn race_time(row: &Row, staggered: bool) -> TimeMs {
    if staggered {
        row.total_time_laps_raw
    } else {
        row.total_time_raw
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    sum: TimeMs,
    base: u32,
    start: u32,
}

fn best_window(pool: &[&Lap], k: usize) -> Option<Window> {
    let first = pool.first()?;
    if pool.len() < k {
        return Some(Window {
            sum: pool.iter().map(|lap| lap.lap_time_ms).sum(),
            base: pool.len() as u32,
            start: first.lap_number,
        });
    }

    pool.windows(k)
        .map(|w| Window {
            sum: w.iter().map(|lap| lap.lap_time_ms).sum(),
            base: k as u32,
            start: w[0].lap_number,
        })
        .min_by_key(|w| w.sum)
}

fn score_pilot(input: &PilotInput, k: usize, live: bool) -> Row {
    let mut row = Row::new(input.pilot.id, input.pilot.callsign.clone(), input.pilot.team.clone());
    row.node = input.node;

    let mut best: Option<(Window, Option<ScoreSource>)> = None;

    for run in &input.runs {
        let active: Vec<&Lap> = run.laps.iter().filter(|lap| !lap.deleted).collect();
        if active.is_empty() {
            continue;
        }
        row.starts += 1;
        row.total_time_raw += active.iter().map(|lap| lap.lap_time_ms).sum::<TimeMs>();

        let pool: Vec<&Lap> = match run.start_behavior {
            StartBehavior::FirstLap => active,
            StartBehavior::Holeshot | StartBehavior::Staggered => {
                active.into_iter().filter(|lap| lap.lap_number > 0).collect()
            }
        };

        row.laps += pool.len() as u32;
        row.total_time_laps_raw += pool.iter().map(|lap| lap.lap_time_ms).sum::<TimeMs>();

        if let Some(fast) = pool.iter().map(|lap| lap.lap_time_ms).min() {
            if row.fastest_lap_raw == 0 || fast < row.fastest_lap_raw {
                row.fastest_lap_raw = fast;
                row.fastest_lap_source = run.source.clone();
            }
        }

        if let Some(window) = best_window(&pool, k) {
            let replace = match &best {
                Some((current, _)) => window_beats(window.base, window.sum, current.base, current.sum),
                None => true,
            };
            if replace {
                best = Some((window, run.source.clone()));
            }
        }

        if live {
            row.last_lap_raw = pool.last().map(|lap| lap.lap_time_ms);
        }
    }

    if row.laps > 0 {
        row.average_lap_raw = row.total_time_laps_raw / TimeMs::from(row.laps);
    }
    if let Some((window, source)) = best {
        row.consecutives_raw = window.sum;
        row.consecutives_base = window.base;
        row.consecutives_lap_start = Some(window.start);
        row.consecutives_source = source;
    }
    row
}

/// For each lap number the first pilot to cross it leads; everyone else is
/// behind by the gap between their latest crossing and the leader's crossing
/// of the same lap.
fn apply_time_behind(rows: &mut [Row], pilots: &[PilotInput]) {
    let mut leader_ts: HashMap<u32, TimeMs> = HashMap::new();
    let mut latest: Vec<Option<(u32, TimeMs)>> = Vec::with_capacity(pilots.len());

    for pilot in pilots {
        let mut last = None;
        for lap in pilot.runs.iter().flat_map(|run| run.laps.iter()).filter(|lap| !lap.deleted) {
            leader_ts
                .entry(lap.lap_number)
                .and_modify(|ts| *ts = (*ts).min(lap.timestamp_ms))
                .or_insert(lap.timestamp_ms);
            last = Some((lap.lap_number, lap.timestamp_ms));
        }
        latest.push(last);
    }

    for (row, last) in rows.iter_mut().zip(latest) {
        row.time_behind_raw = last.and_then(|(number, ts)| {
            let lead = leader_ts.get(&number)?;
            (ts > *lead).then_some(ts - lead)
        });
    }
}

fn fastest_race_lap(by_fastest_lap: &[Row], previous: Option<&Leaderboard>) -> Option<FastestRaceLap> {
    let top = by_fastest_lap.first()?;
    if top.laps == 0 || top.fastest_lap_raw <= 0 {
        return None;
    }

    let unchanged = previous
        .and_then(|lb| lb.meta.fastest_race_lap_data.as_ref())
        .filter(|prev| prev.pilot_id == top.pilot_id && prev.time_raw == top.fastest_lap_raw);
    if let Some(prev) = unchanged {
        return Some(prev.clone());
    }

    Some(FastestRaceLap {
        pilot_id: top.pilot_id,
        callsign: top.callsign.clone(),
        time_raw: top.fastest_lap_raw,
        text: format_time_ms(top.fastest_lap_raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lap::{LapSource, append_lap};

    fn pool_laps(times: &[TimeMs]) -> Vec<Lap> {
        let mut laps = Vec::new();
        let mut ts = 0;
        for t in times {
            ts += t;
            append_lap(&mut laps, 1, 0, ts, LapSource::Realtime);
        }
        laps
    }

    #[test]
    fn window_takes_smallest_contiguous_sum() {
        let laps = pool_laps(&[2_000, 30_000, 25_000, 20_000, 21_000, 40_000]);
        let pool: Vec<&Lap> = laps.iter().filter(|l| l.lap_number > 0).collect();
        let window = best_window(&pool, 3).expect("window");
        assert_eq!(window.sum, 66_000);
        assert_eq!(window.base, 3);
        assert_eq!(window.start, 2);
    }

    #[test]
    fn short_pool_sums_everything() {
        let laps = pool_laps(&[2_000, 30_000, 25_000]);
        let pool: Vec<&Lap> = laps.iter().filter(|l| l.lap_number > 0).collect();
        let window = best_window(&pool, 3).expect("window");
        assert_eq!((window.sum, window.base), (55_000, 2));
        assert!(best_window(&[], 3).is_none());
    }

    #[test]
    fn fuller_window_beats_faster_partial_one() {
        assert!(window_beats(3, 90_000, 2, 40_000));
        assert!(window_beats(2, 39_000, 2, 40_000));
        assert!(!window_beats(2, 0, 2, 40_000));
    }
}
