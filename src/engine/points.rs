//! Points awarding and class ranking methods.

use std::num::ParseIntError;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::{
    lap::Heat,
    leaderboard::Leaderboard,
    types::PilotId,
};

use super::traits::{ClassRankMethod, PointsMethod};

/// One line of a class ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankRow {
    /// Pilot ranked.
    pub pilot_id: PilotId,
    /// Display callsign.
    pub callsign: String,
    /// Team name.
    pub team_name: String,
    /// Heat the rank was taken from.
    pub heat: String,
    /// Position within that heat.
    pub heat_rank: u32,
    /// Class position.
    pub position: u32,
}

/// Output of a [`ClassRankMethod`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranking {
    /// Method that produced it.
    pub method: String,
    /// Ranked lines.
    pub rows: Vec<RankRow>,
}

/// Awards `points[i]` to the row at index `i` of the primary view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointsByPosition {
    points: Vec<u32>,
}

impl PointsByPosition {
    /// Points for first, second, third and so on.
    pub fn new(points: Vec<u32>) -> Self {
        Self { points }
    }

    /// Parses a comma-separated list such as `10,6,3,1`.
    pub fn parse(list: &str) -> Result<Self, ParseIntError> {
        let points = list
            .split(',')
            .map(|part| part.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(points))
    }
}

impl PointsMethod for PointsByPosition {
    fn name(&self) -> &str {
        "position"
    }

    fn apply(&self, leaderboard: &mut Leaderboard) {
        let primary = leaderboard.meta.primary_leaderboard;
        let mut awarded: Vec<(PilotId, u32)> = Vec::new();
        for (row, points) in leaderboard.view_mut(primary).iter_mut().zip(&self.points) {
            row.points = Some(*points);
            awarded.push((row.pilot_id, *points));
        }

        // keep the other views consistent with the primary one
        for view in [
            &mut leaderboard.by_race_time,
            &mut leaderboard.by_fastest_lap,
            &mut leaderboard.by_consecutives,
        ] {
            for row in view.iter_mut() {
                if let Some((_, points)) = awarded.iter().find(|(id, _)| *id == row.pilot_id) {
                    row.points = Some(*points);
                }
            }
        }
        leaderboard.meta.primary_points = true;
    }
}

/// Ranks pilots by their finishing position in the latest heat they flew,
/// favoring later heats.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastHeatPosition;

impl ClassRankMethod for LastHeatPosition {
    fn name(&self) -> &str {
        "last_heat_position"
    }

    fn rank(&self, heats: &[(&Heat, &Leaderboard)]) -> Ranking {
        let mut seen: HashSet<PilotId> = HashSet::new();
        let mut rows = Vec::new();

        for (heat, leaderboard) in heats.iter().rev() {
            for line in leaderboard.primary() {
                if !seen.insert(line.pilot_id) {
                    continue;
                }
                rows.push(RankRow {
                    pilot_id: line.pilot_id,
                    callsign: line.callsign.clone(),
                    team_name: line.team_name.clone(),
                    heat: heat.display_name(),
                    heat_rank: line.position,
                    position: rows.len() as u32 + 1,
                });
            }
        }

        Ranking {
            method: self.name().to_string(),
            rows,
        }
    }
}
