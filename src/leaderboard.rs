//! Ranked leaderboard rows, views and metadata.

use serde::{Deserialize, Serialize};

use crate::types::{
    HeatId, NodeIndex, PilotId, PrimaryLeaderboard, RaceId, RoundId, StartBehavior, TimeMs,
    WinCondition,
};

/// Attribution of a best lap or window to the race it was flown in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSource {
    /// Saved race, when known.
    pub race_id: Option<RaceId>,
    /// Heat of that race.
    pub heat_id: Option<HeatId>,
    /// Round of that race.
    pub round_id: Option<RoundId>,
    /// Human-readable label such as `Heat 3 / Round 2`.
    pub label: String,
}

/// One pilot's line in a leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Pilot scored.
    pub pilot_id: PilotId,
    /// Display callsign.
    pub callsign: String,
    /// Team name.
    pub team_name: String,
    /// Seat, for live and single-race scopes.
    pub node: Option<NodeIndex>,
    /// Counted laps.
    pub laps: u32,
    /// Races started.
    pub starts: u32,
    /// Race time including the holeshot.
    pub total_time_raw: TimeMs,
    /// Sum of counted laps.
    pub total_time_laps_raw: TimeMs,
    /// `total_time_laps_raw / laps`, 0 without laps.
    pub average_lap_raw: TimeMs,
    /// Best counted lap, 0 without laps.
    pub fastest_lap_raw: TimeMs,
    /// Where the best lap was flown.
    pub fastest_lap_source: Option<ScoreSource>,
    /// Best window sum, 0 without laps.
    pub consecutives_raw: TimeMs,
    /// Laps in the best window (the configured count unless short).
    pub consecutives_base: u32,
    /// Lap number the best window starts on.
    pub consecutives_lap_start: Option<u32>,
    /// Where the best window was flown.
    pub consecutives_source: Option<ScoreSource>,
    /// Most recent lap time, live scope only.
    pub last_lap_raw: Option<TimeMs>,
    /// Gap to the first pilot to reach the same lap, live scope only.
    pub time_behind_raw: Option<TimeMs>,
    /// Points awarded by a points method.
    pub points: Option<u32>,
    /// Competition rank (1-based, shared on ties).
    pub position: u32,
}

impl Row {
    /// An empty line for `pilot_id`.
    pub fn new(pilot_id: PilotId, callsign: impl Into<String>, team_name: impl Into<String>) -> Self {
        Self {
            pilot_id,
            callsign: callsign.into(),
            team_name: team_name.into(),
            node: None,
            laps: 0,
            starts: 0,
            total_time_raw: 0,
            total_time_laps_raw: 0,
            average_lap_raw: 0,
            fastest_lap_raw: 0,
            fastest_lap_source: None,
            consecutives_raw: 0,
            consecutives_base: 0,
            consecutives_lap_start: None,
            consecutives_source: None,
            last_lap_raw: None,
            time_behind_raw: None,
            points: None,
            position: 0,
        }
    }
}

/// Fastest lap of the whole scope, for announcements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastestRaceLap {
    /// Pilot holding it.
    pub pilot_id: PilotId,
    /// Their callsign.
    pub callsign: String,
    /// Lap time.
    pub time_raw: TimeMs,
    /// Formatted lap time.
    pub text: String,
}

/// Scoring context the views were built under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardMeta {
    /// View used for official placement.
    pub primary_leaderboard: PrimaryLeaderboard,
    /// Winner rule.
    pub win_condition: WinCondition,
    /// Team or co-op scoring in effect.
    pub team_racing_mode: bool,
    /// Holeshot handling; `None` when unknown or mixed.
    pub start_behavior: Option<StartBehavior>,
    /// Consecutive window size.
    pub consecutives_count: usize,
    /// Fastest lap across the scope.
    pub fastest_race_lap_data: Option<FastestRaceLap>,
    /// Rows carry points.
    pub primary_points: bool,
}

impl LeaderboardMeta {
    /// Meta for a scope with no format information.
    pub fn fallback(consecutives_count: usize) -> Self {
        Self {
            primary_leaderboard: PrimaryLeaderboard::ByRaceTime,
            win_condition: WinCondition::None,
            team_racing_mode: false,
            start_behavior: None,
            consecutives_count,
            fastest_race_lap_data: None,
            primary_points: false,
        }
    }
}

/// Three ranked views of the same rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaderboard {
    /// Laps then time.
    pub by_race_time: Vec<Row>,
    /// Fastest single lap.
    pub by_fastest_lap: Vec<Row>,
    /// Best consecutive window.
    pub by_consecutives: Vec<Row>,
    /// Scoring context.
    pub meta: LeaderboardMeta,
}

impl Leaderboard {
    /// The requested view.
    pub fn view(&self, which: PrimaryLeaderboard) -> &[Row] {
        match which {
            PrimaryLeaderboard::ByRaceTime => &self.by_race_time,
            PrimaryLeaderboard::ByFastestLap => &self.by_fastest_lap,
            PrimaryLeaderboard::ByConsecutives => &self.by_consecutives,
        }
    }

    /// Mutable access to the requested view.
    pub fn view_mut(&mut self, which: PrimaryLeaderboard) -> &mut Vec<Row> {
        match which {
            PrimaryLeaderboard::ByRaceTime => &mut self.by_race_time,
            PrimaryLeaderboard::ByFastestLap => &mut self.by_fastest_lap,
            PrimaryLeaderboard::ByConsecutives => &mut self.by_consecutives,
        }
    }

    /// The official placement view.
    pub fn primary(&self) -> &[Row] {
        self.view(self.meta.primary_leaderboard)
    }

    /// True when no pilot is listed.
    pub fn is_empty(&self) -> bool {
        self.by_race_time.is_empty()
    }
}

/// Formats milliseconds as `m:ss.mmm`.
pub fn format_time_ms(ms: TimeMs) -> String {
    let sign = if ms < 0 { "-" } else { "" };
    let ms = ms.unsigned_abs();
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;
    format!("{sign}{minutes}:{seconds:02}.{millis:03}")
}
