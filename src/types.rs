//! Shared primitive IDs, result scopes and scoring enums.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Pilot identifier.
pub type PilotId = u32;
/// Heat identifier.
pub type HeatId = u32;
/// Race class identifier.
pub type ClassId = u32;
/// Saved race identifier.
pub type RaceId = u32;
/// Round number within a heat.
pub type RoundId = u32;
/// Race format identifier.
pub type FormatId = u32;
/// Timer node (seat) index.
pub type NodeIndex = usize;
/// Monotonic record-store operation sequence number.
pub type OpSeq = u64;
/// Milliseconds. Signed so splits and gaps can go negative.
pub type TimeMs = i64;

/// A cache/aggregation scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    /// The in-progress race.
    Current,
    /// A single saved race.
    Race(RaceId),
    /// Every saved race of a heat.
    Heat(HeatId),
    /// Every heat of a class.
    Class(ClassId),
    /// Every class plus unclassified heats.
    Event,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Current => write!(f, "current"),
            Scope::Race(id) => write!(f, "race:{id}"),
            Scope::Heat(id) => write!(f, "heat:{id}"),
            Scope::Class(id) => write!(f, "class:{id}"),
            Scope::Event => write!(f, "event"),
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "current" => return Ok(Scope::Current),
            "event" => return Ok(Scope::Event),
            _ => {}
        }

        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed scope: {s}"))?;
        let id: u32 = id.parse().map_err(|e| format!("malformed scope id {s}: {e}"))?;
        match kind {
            "race" => Ok(Scope::Race(id)),
            "heat" => Ok(Scope::Heat(id)),
            "class" => Ok(Scope::Class(id)),
            _ => Err(format!("unknown scope kind: {kind}")),
        }
    }
}

/// How a race decides its winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WinCondition {
    /// No winner is called.
    #[default]
    None,
    /// Most laps, ties broken by total time.
    MostProgress,
    /// First to reach a lap count.
    FirstToLapX,
    /// Single fastest lap.
    FastestLap,
    /// Fastest run of consecutive laps.
    FastestConsecutive,
    /// Lap count only; equal laps tie.
    MostLaps,
    /// Lap count, with ties at time expiry continuing as overtime.
    MostLapsOvertime,
}

/// How lap 0 is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartBehavior {
    /// Lap 0 is a holeshot and is not counted.
    #[default]
    Holeshot,
    /// Lap 0 is a full lap.
    FirstLap,
    /// Holeshot excluded; race-time order uses lap time only.
    Staggered,
}

/// Individual or team scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TeamMode {
    /// Every pilot for themselves.
    #[default]
    Individual,
    /// Pilots grouped by team name.
    Team,
    /// The whole field works toward one shared result.
    Coop,
}

impl TeamMode {
    /// True for any grouped mode.
    pub fn is_team(self) -> bool {
        !matches!(self, TeamMode::Individual)
    }
}

/// Race lifecycle status reported by the race-state layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RaceStatus {
    /// Not started.
    #[default]
    Ready,
    /// Staging tones running.
    Staging,
    /// Race in progress.
    Racing,
    /// Stopped.
    Done,
}

/// Outcome state of the win-condition evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WinStatus {
    /// Undecided.
    #[default]
    None,
    /// A trailing competitor's crossing could still change the outcome.
    PendingCrossing,
    /// Top two are level.
    Tie,
    /// Winner called.
    Declared,
    /// Tied at time expiry; racing continues.
    Overtime,
}

/// Which ranked view is used for official placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryLeaderboard {
    /// Laps then time.
    #[default]
    ByRaceTime,
    /// Single fastest lap.
    ByFastestLap,
    /// Best consecutive window.
    ByConsecutives,
}

impl PrimaryLeaderboard {
    /// Primary view implied by a win condition.
    pub fn for_condition(condition: WinCondition) -> Self {
        match condition {
            WinCondition::FastestConsecutive => PrimaryLeaderboard::ByConsecutives,
            WinCondition::FastestLap => PrimaryLeaderboard::ByFastestLap,
            _ => PrimaryLeaderboard::ByRaceTime,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_text_parses_back() {
        for scope in [
            Scope::Current,
            Scope::Race(4),
            Scope::Heat(12),
            Scope::Class(1),
            Scope::Event,
        ] {
            assert_eq!(scope.to_string().parse::<Scope>(), Ok(scope));
        }
        assert!("lap:3".parse::<Scope>().is_err());
        assert!("heat:x".parse::<Scope>().is_err());
    }

    #[test]
    fn primary_view_follows_condition() {
        assert_eq!(
            PrimaryLeaderboard::for_condition(WinCondition::FastestLap),
            PrimaryLeaderboard::ByFastestLap
        );
        assert_eq!(
            PrimaryLeaderboard::for_condition(WinCondition::FastestConsecutive),
            PrimaryLeaderboard::ByConsecutives
        );
        assert_eq!(
            PrimaryLeaderboard::for_condition(WinCondition::MostLapsOvertime),
            PrimaryLeaderboard::ByRaceTime
        );
    }
}
