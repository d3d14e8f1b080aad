//! Team and co-op aggregation over an individual leaderboard.

use std::cmp::Reverse;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{
    leaderboard::Leaderboard,
    types::{NodeIndex, PrimaryLeaderboard, TeamMode, TimeMs, WinCondition},
};

use super::ranking::{Ranked, assign_positions, time_key};

/// Name of the single competitor produced in co-op mode.
pub const COOP_TEAM_NAME: &str = "Co-op";

/// One team's line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRow {
    /// Team name.
    pub name: String,
    /// Pilots on the team.
    pub members: u32,
    /// Members that have put in a counting result.
    pub contributing: u32,
    /// `contributing / members`.
    pub contribution_amt: f64,
    /// Sum of member laps.
    pub laps: u32,
    /// Sum of member race times.
    pub total_time_raw: TimeMs,
    /// Mean of contributing members' average laps.
    pub average_lap_raw: f64,
    /// Mean of contributing members' fastest laps.
    pub average_fastest_lap_raw: f64,
    /// Mean of contributing members' consecutive windows.
    pub average_consecutives_raw: f64,
    /// Seats flown by members in the live scope.
    pub nodes: Vec<NodeIndex>,
    /// Competition rank.
    pub position: u32,
}

impl Ranked for TeamRow {
    fn position(&self) -> u32 {
        self.position
    }

    fn set_position(&mut self, position: u32) {
        self.position = position;
    }
}

/// Team views plus the grouping they were built under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamLeaderboard {
    /// Laps then time.
    pub by_race_time: Vec<TeamRow>,
    /// Contribution then mean fastest lap.
    pub by_avg_fastest_lap: Vec<TeamRow>,
    /// Contribution then mean consecutive window.
    pub by_avg_consecutives: Vec<TeamRow>,
    /// Winner rule of the source leaderboard.
    pub win_condition: WinCondition,
    /// Grouping used.
    pub mode: TeamMode,
}

impl TeamLeaderboard {
    /// Team row by name.
    pub fn team(&self, name: &str) -> Option<&TeamRow> {
        self.by_race_time.iter().find(|row| row.name == name)
    }

    /// Team counterpart of an individual view.
    pub fn view(&self, which: PrimaryLeaderboard) -> &[TeamRow] {
        match which {
            PrimaryLeaderboard::ByRaceTime => &self.by_race_time,
            PrimaryLeaderboard::ByFastestLap => &self.by_avg_fastest_lap,
            PrimaryLeaderboard::ByConsecutives => &self.by_avg_consecutives,
        }
    }

    /// The official placement view.
    pub fn primary(&self) -> &[TeamRow] {
        self.view(PrimaryLeaderboard::for_condition(self.win_condition))
    }
}

#[derive(Default)]
struct TeamAcc {
    members: u32,
    contributing: u32,
    laps: u32,
    total_time_raw: TimeMs,
    combined_average: TimeMs,
    combined_fastest: TimeMs,
    combined_consecutives: TimeMs,
    nodes: Vec<NodeIndex>,
}

/// Groups `leaderboard` rows by team name (or into one co-op team) and
/// ranks the three team views. Returns `None` for an empty leaderboard.
pub fn team_leaderboard(leaderboard: &Leaderboard, mode: TeamMode) -> Option<TeamLeaderboard> {
    if leaderboard.is_empty() {
        return None;
    }

    let k = leaderboard.meta.consecutives_count as u32;
    let needs_window = leaderboard.meta.win_condition == WinCondition::FastestConsecutive;

    let mut names: Vec<String> = Vec::new();
    let mut teams: HashMap<String, TeamAcc> = HashMap::new();

    for row in &leaderboard.by_race_time {
        let name = match mode {
            TeamMode::Coop => COOP_TEAM_NAME.to_string(),
            TeamMode::Individual | TeamMode::Team => row.team_name.clone(),
        };
        let acc = teams.entry(name.clone()).or_insert_with(|| {
            names.push(name);
            TeamAcc::default()
        });

        let contributes = if needs_window { row.laps >= k } else { row.laps > 0 };
        acc.members += 1;
        acc.contributing += u32::from(contributes);
        acc.laps += row.laps;
        acc.total_time_raw += row.total_time_raw;
        acc.combined_average += row.average_lap_raw.max(0);
        acc.combined_fastest += row.fastest_lap_raw.max(0);
        acc.combined_consecutives += row.consecutives_raw.max(0);
        acc.nodes.extend(row.node);
    }

    let rows: Vec<TeamRow> = names
        .into_iter()
        .filter_map(|name| teams.remove(&name).map(|acc| (name, acc)))
        .map(|(name, acc)| {
            let mean = |combined: TimeMs| {
                if acc.contributing > 0 {
                    combined as f64 / f64::from(acc.contributing)
                } else {
                    0.0
                }
            };
            TeamRow {
                contribution_amt: f64::from(acc.contributing) / f64::from(acc.members),
                average_lap_raw: mean(acc.combined_average),
                average_fastest_lap_raw: mean(acc.combined_fastest),
                average_consecutives_raw: mean(acc.combined_consecutives),
                name,
                members: acc.members,
                contributing: acc.contributing,
                laps: acc.laps,
                total_time_raw: acc.total_time_raw,
                nodes: acc.nodes,
                position: 0,
            }
        })
        .collect();

    let mut by_race_time = rows.clone();
    by_race_time.sort_by_key(|r| (Reverse(r.laps), time_key(r.total_time_raw)));
    assign_positions(&mut by_race_time, |a, b| {
        a.laps == b.laps && a.total_time_raw == b.total_time_raw
    });

    let mut by_avg_fastest_lap = rows.clone();
    by_avg_fastest_lap.sort_by(|a, b| {
        b.contribution_amt
            .total_cmp(&a.contribution_amt)
            .then(avg_key(a.average_fastest_lap_raw).total_cmp(&avg_key(b.average_fastest_lap_raw)))
            .then(b.laps.cmp(&a.laps))
    });
    assign_positions(&mut by_avg_fastest_lap, |a, b| {
        a.contribution_amt == b.contribution_amt && a.average_fastest_lap_raw == b.average_fastest_lap_raw
    });

    let mut by_avg_consecutives = rows;
    by_avg_consecutives.sort_by(|a, b| {
        b.contribution_amt
            .total_cmp(&a.contribution_amt)
            .then(avg_key(a.average_consecutives_raw).total_cmp(&avg_key(b.average_consecutives_raw)))
            .then(b.laps.cmp(&a.laps))
            .then(time_key(a.total_time_raw).cmp(&time_key(b.total_time_raw)))
    });
    assign_positions(&mut by_avg_consecutives, |a, b| {
        a.contribution_amt == b.contribution_amt
            && a.average_consecutives_raw == b.average_consecutives_raw
            && (b.laps >= k || (a.laps == b.laps && a.total_time_raw == b.total_time_raw))
    });

    Some(TeamLeaderboard {
        by_race_time,
        by_avg_fastest_lap,
        by_avg_consecutives,
        win_condition: leaderboard.meta.win_condition,
        mode,
    })
}

fn avg_key(value: f64) -> f64 {
    if value > 0.0 { value } else { f64::INFINITY }
}
