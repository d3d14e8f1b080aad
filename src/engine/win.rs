//! Win-condition evaluation.
//!
//! Every condition runs through one driver:
//!
//! 1. decide when the race is stopped, every seat has finished, or the
//!    caller forces it;
//! 2. before deciding, wait on in-flight crossings of competitors still
//!    within reach of the leader;
//! 3. equal metrics at the top are a tie, otherwise the leader wins;
//! 4. once race time has expired, call the race early when no trailing
//!    competitor can still change the outcome.
//!
//! The per-condition parts (metric, reach, tie rule, early-call rule) live
//! behind [`WinRule`]. Team and co-op variants evaluate team rows built by
//! [`team_leaderboard`] with per-member finished counts.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    lap::RaceFormat,
    leaderboard::{Leaderboard, Row},
    types::{NodeIndex, PrimaryLeaderboard, RaceStatus, TeamMode, TimeMs, WinCondition, WinStatus},
};

use super::{
    team::{TeamLeaderboard, TeamRow, team_leaderboard},
    traits::RaceSignals,
};

/// The declared winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Winner {
    /// Individual racing.
    Pilot(Row),
    /// Team or co-op racing.
    Team(TeamRow),
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WinResult {
    /// Evaluator state.
    pub status: WinStatus,
    /// Rank-1 competitor when `status` is `Declared`.
    pub data: Option<Winner>,
    /// Upper bound on how long the outcome can stay open; re-check after it.
    pub max_consideration_ms: Option<TimeMs>,
}

impl WinResult {
    fn none() -> Self {
        Self::default()
    }

    fn considering(max_consideration_ms: Option<TimeMs>) -> Self {
        Self {
            max_consideration_ms,
            ..Self::default()
        }
    }

    fn with_status(status: WinStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    fn declared(winner: Winner) -> Self {
        Self {
            status: WinStatus::Declared,
            data: Some(winner),
            max_consideration_ms: None,
        }
    }
}

/// Caller flags for one evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WinCheck {
    /// Make a final call regardless of race state.
    pub forced: bool,
    /// Evaluation triggered by the race timer reaching its nominal end.
    pub at_finish: bool,
}

/// Evaluates the win condition of `format` against the live leaderboard.
pub fn check_win_condition(
    leaderboard: &Leaderboard,
    format: &RaceFormat,
    signals: &dyn RaceSignals,
    check: WinCheck,
) -> WinResult {
    let teams = if format.team_mode.is_team() {
        team_leaderboard(leaderboard, format.team_mode)
    } else {
        None
    };
    let ctx = Context {
        leaderboard,
        teams: teams.as_ref(),
        format,
        signals,
    };

    let result = match format.win_condition {
        WinCondition::None => WinResult::none(),
        WinCondition::MostLapsOvertime => check_overtime(&ctx, check),
        condition => evaluate(rule_for(condition), &ctx, check, false),
    };

    match result.status {
        WinStatus::Declared => info!(condition = ?format.win_condition, "winner declared"),
        WinStatus::Tie => info!(condition = ?format.win_condition, "race tied"),
        WinStatus::Overtime => info!(condition = ?format.win_condition, "tied at time expiry, overtime"),
        WinStatus::None | WinStatus::PendingCrossing => {}
    }
    result
}

/// Tracks the outcome across evaluations of one race.
///
/// `Declared` is final; `Tie` and `Overtime` only give way to `Declared`.
#[derive(Debug, Clone, Default)]
pub struct WinTracker {
    current: WinResult,
}

impl WinTracker {
    /// Creates a tracker in `None`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest accepted result.
    pub fn current(&self) -> &WinResult {
        &self.current
    }

    /// Latest accepted status.
    pub fn status(&self) -> WinStatus {
        self.current.status
    }

    /// True once no further evaluation can change the outcome.
    pub fn is_final(&self) -> bool {
        self.current.status == WinStatus::Declared
    }

    /// Folds in a new evaluation. Returns `true` when the tracked result
    /// changed.
    pub fn observe(&mut self, result: WinResult) -> bool {
        let accept = match self.current.status {
            WinStatus::Declared => false,
            WinStatus::Tie | WinStatus::Overtime => result.status == WinStatus::Declared,
            WinStatus::None | WinStatus::PendingCrossing => true,
        };
        if !accept || result == self.current {
            return false;
        }
        self.current = result;
        true
    }

    /// Back to `None` for a new race.
    pub fn reset(&mut self) {
        self.current = WinResult::none();
    }
}

struct Context<'a> {
    leaderboard: &'a Leaderboard,
    teams: Option<&'a TeamLeaderboard>,
    format: &'a RaceFormat,
    signals: &'a dyn RaceSignals,
}

/// A pilot or team as seen by the rules.
struct Competitor<'a> {
    entry: Entry<'a>,
    laps: u32,
    total: TimeMs,
    fastest: f64,
    consecutives: f64,
    base: u32,
    contribution: f64,
    members: u32,
    finished: u32,
    nodes: Vec<NodeIndex>,
}

enum Entry<'a> {
    Pilot(&'a Row),
    Team(&'a TeamRow),
}

impl Competitor<'_> {
    fn unfinished(&self) -> u32 {
        self.members.saturating_sub(self.finished)
    }

    fn all_finished(&self) -> bool {
        self.unfinished() == 0
    }

    fn winner(&self) -> Winner {
        match self.entry {
            Entry::Pilot(row) => Winner::Pilot(row.clone()),
            Entry::Team(row) => Winner::Team(row.clone()),
        }
    }
}

/// Competitors ordered by the view the condition ranks on.
struct Field<'a> {
    competitors: Vec<Competitor<'a>>,
    mode: TeamMode,
    k: u32,
    number_laps_win: u32,
}

impl<'a> Field<'a> {
    fn build(ctx: &Context<'a>, view: PrimaryLeaderboard) -> Self {
        let signals = ctx.signals;
        let finished_of = |nodes: &[NodeIndex]| nodes.iter().filter(|n| signals.has_finished(**n)).count() as u32;

        let competitors = match (ctx.format.team_mode, ctx.teams) {
            (TeamMode::Individual, _) => ctx
                .leaderboard
                .view(view)
                .iter()
                .map(|row| {
                    let nodes: Vec<NodeIndex> = row.node.into_iter().collect();
                    Competitor {
                        entry: Entry::Pilot(row),
                        laps: row.laps,
                        total: row.total_time_raw,
                        fastest: row.fastest_lap_raw as f64,
                        consecutives: row.consecutives_raw as f64,
                        base: row.consecutives_base,
                        contribution: 1.0,
                        members: 1,
                        finished: finished_of(&nodes),
                        nodes,
                    }
                })
                .collect(),
            (_, Some(teams)) => teams
                .view(view)
                .iter()
                .map(|team| Competitor {
                    entry: Entry::Team(team),
                    laps: team.laps,
                    total: team.total_time_raw,
                    fastest: team.average_fastest_lap_raw,
                    consecutives: team.average_consecutives_raw,
                    base: team.laps,
                    contribution: team.contribution_amt,
                    members: team.members,
                    finished: finished_of(&team.nodes),
                    nodes: team.nodes.clone(),
                })
                .collect(),
            (_, None) => Vec::new(),
        };

        Self {
            competitors,
            mode: ctx.format.team_mode,
            k: ctx.leaderboard.meta.consecutives_count as u32,
            number_laps_win: ctx.format.number_laps_win,
        }
    }

    fn leader(&self) -> Option<&Competitor<'a>> {
        self.competitors.first()
    }

    fn trailing(&self) -> impl Iterator<Item = &Competitor<'a>> {
        self.competitors.iter().skip(1)
    }

    fn is_team(&self) -> bool {
        self.mode.is_team()
    }
}

enum Speculation {
    /// Nobody can still change the outcome; decide now.
    Force,
    /// Keep waiting, optionally with a re-check bound.
    Undecided(Option<TimeMs>),
}

/// Per-condition metric, reach, tie and early-call rules.
trait WinRule {
    /// View competitors are ordered by.
    fn view(&self) -> PrimaryLeaderboard {
        PrimaryLeaderboard::ByRaceTime
    }

    /// Decisions may be attempted while the race is still running.
    fn always_eligible(&self) -> bool {
        false
    }

    /// The leader has a result worth declaring.
    fn has_result(&self, leader: &Competitor<'_>, field: &Field<'_>) -> bool;

    /// An in-flight crossing by `other` could still tie or pass `leader`.
    fn in_reach(&self, other: &Competitor<'_>, leader: &Competitor<'_>, field: &Field<'_>) -> bool;

    fn ties(&self, first: &Competitor<'_>, second: &Competitor<'_>, field: &Field<'_>) -> bool;

    /// Early-call rule applied after race time has expired.
    fn speculate(&self, field: &Field<'_>, signals: &dyn RaceSignals, overtime: bool) -> Speculation;
}

fn rule_for(condition: WinCondition) -> &'static dyn WinRule {
    match condition {
        WinCondition::MostLaps | WinCondition::MostLapsOvertime => &MostLaps,
        WinCondition::FirstToLapX => &FirstToLapX,
        WinCondition::FastestLap => &FastestLap,
        WinCondition::FastestConsecutive => &FastestConsecutive,
        WinCondition::MostProgress | WinCondition::None => &MostProgress,
    }
}

fn evaluate(rule: &dyn WinRule, ctx: &Context<'_>, check: WinCheck, overtime: bool) -> WinResult {
    let field = Field::build(ctx, rule.view());
    drive(rule, &field, ctx.signals, check, overtime)
}

fn drive(rule: &dyn WinRule, field: &Field<'_>, signals: &dyn RaceSignals, check: WinCheck, overtime: bool) -> WinResult {
    let status = signals.status();
    let eligible = rule.always_eligible() || check.forced || status == RaceStatus::Done || signals.all_finished();
    if eligible {
        return decide(rule, field, signals);
    }

    let time_expired = (status == RaceStatus::Racing && !signals.timer_running()) || check.at_finish;
    if !time_expired || field.mode == TeamMode::Coop || field.competitors.len() < 2 {
        return WinResult::none();
    }

    let Some(leader) = field.leader() else {
        return WinResult::none();
    };
    if !rule.has_result(leader, field) {
        return WinResult::none();
    }
    if let Some(pending) = crossing_guard(rule, field, signals) {
        return pending;
    }

    match rule.speculate(field, signals, overtime) {
        Speculation::Force => {
            debug!("no competitor can change the outcome, forcing decision");
            let forced = WinCheck { forced: true, ..check };
            drive(rule, field, signals, forced, overtime)
        }
        Speculation::Undecided(bound) => WinResult::considering(bound),
    }
}

fn decide(rule: &dyn WinRule, field: &Field<'_>, signals: &dyn RaceSignals) -> WinResult {
    let needed = if field.mode == TeamMode::Coop { 1 } else { 2 };
    if field.competitors.len() < needed {
        return WinResult::none();
    }
    let Some(leader) = field.leader() else {
        return WinResult::none();
    };
    if !rule.has_result(leader, field) {
        return WinResult::none();
    }
    if let Some(pending) = crossing_guard(rule, field, signals) {
        return pending;
    }
    if let Some(second) = field.competitors.get(1) {
        if rule.ties(leader, second, field) {
            return WinResult::with_status(WinStatus::Tie);
        }
    }
    WinResult::declared(leader.winner())
}

/// Team variants scan every team, the leader's own included, since any
/// member's crossing moves the team total.
fn crossing_guard(rule: &dyn WinRule, field: &Field<'_>, signals: &dyn RaceSignals) -> Option<WinResult> {
    let leader = field.leader()?;
    let skip = if field.is_team() { 0 } else { 1 };
    let node = field
        .competitors
        .iter()
        .skip(skip)
        .filter(|c| rule.in_reach(c, leader, field))
        .flat_map(|c| c.nodes.iter().copied())
        .find(|node| signals.crossing_in_progress(*node))?;

    info!(node = node + 1, "waiting for crossing to decide winner");
    Some(WinResult::with_status(WinStatus::PendingCrossing))
}

fn check_overtime(ctx: &Context<'_>, check: WinCheck) -> WinResult {
    let signals = ctx.signals;
    let status = signals.status();
    let forced = WinCheck { forced: true, ..check };

    if status == RaceStatus::Done {
        return evaluate(&MostLaps, ctx, forced, false);
    }
    if !((status == RaceStatus::Racing && !signals.timer_running()) || check.at_finish) {
        return WinResult::none();
    }

    let rows = &ctx.leaderboard.by_race_time;
    if rows.is_empty() {
        return WinResult::none();
    }
    let crossed_after_time = signals
        .nominal_ms()
        .is_some_and(|nominal| rows.iter().any(|row| row.total_time_raw > nominal));

    if crossed_after_time {
        return evaluate(&MostProgress, ctx, check, true);
    }

    let mut result = evaluate(&MostLaps, ctx, forced, false);
    if result.status == WinStatus::Tie {
        result.status = WinStatus::Overtime;
    }
    result
}

fn lap_reach(other: &Competitor<'_>, leader: &Competitor<'_>) -> bool {
    other.laps + 1 >= leader.laps
}

/// Laps, then total time.
struct MostProgress;

impl WinRule for MostProgress {
    fn has_result(&self, leader: &Competitor<'_>, _field: &Field<'_>) -> bool {
        leader.laps > 0
    }

    fn in_reach(&self, other: &Competitor<'_>, leader: &Competitor<'_>, _field: &Field<'_>) -> bool {
        lap_reach(other, leader)
    }

    fn ties(&self, first: &Competitor<'_>, second: &Competitor<'_>, _field: &Field<'_>) -> bool {
        first.laps == second.laps && first.total == second.total
    }

    fn speculate(&self, field: &Field<'_>, _signals: &dyn RaceSignals, overtime: bool) -> Speculation {
        let Some(leader) = field.leader() else {
            return Speculation::Undecided(None);
        };
        let lead = leader.laps;

        if !field.is_team() {
            let can_pass = field
                .trailing()
                .filter(|c| c.laps >= lead && c.unfinished() > 0)
                .count();
            return if can_pass == 0 {
                Speculation::Force
            } else {
                Speculation::Undecided(None)
            };
        }

        if overtime && leader.finished > 0 {
            return Speculation::Force;
        }

        // The re-check bound covers only teams that can still reach the
        // leader's laps; teams out of reach never delay the call.
        let leader_finished = leader.all_finished();
        let mut can_pass = 0;
        let mut bound: TimeMs = 0;
        for team in field.trailing() {
            if team.laps + team.unfinished() >= lead {
                can_pass += 1;
                let remaining = (leader.total - team.total) * TimeMs::from(team.unfinished());
                bound = bound.max(remaining);
            }
        }

        if can_pass == 0 {
            Speculation::Force
        } else if leader_finished {
            Speculation::Undecided(Some(bound))
        } else {
            Speculation::Undecided(None)
        }
    }
}

/// Laps only; equal laps tie.
struct MostLaps;

impl WinRule for MostLaps {
    fn has_result(&self, leader: &Competitor<'_>, _field: &Field<'_>) -> bool {
        leader.laps > 0
    }

    fn in_reach(&self, other: &Competitor<'_>, leader: &Competitor<'_>, _field: &Field<'_>) -> bool {
        lap_reach(other, leader)
    }

    fn ties(&self, first: &Competitor<'_>, second: &Competitor<'_>, _field: &Field<'_>) -> bool {
        first.laps == second.laps
    }

    fn speculate(&self, field: &Field<'_>, _signals: &dyn RaceSignals, _overtime: bool) -> Speculation {
        let Some(leader) = field.leader() else {
            return Speculation::Undecided(None);
        };
        let lead = leader.laps;

        let (mut can_pass, mut can_tie, mut tied) = (0, 0, 0);
        for other in field.trailing() {
            let potential = other.laps + other.unfinished();
            if other.laps >= lead {
                tied += 1;
            }
            if potential > lead {
                can_pass += 1;
            } else if potential == lead {
                can_tie += 1;
            }
        }

        if can_pass == 0 && ((can_tie == 0 && tied == 0) || (tied > 0 && leader.all_finished())) {
            Speculation::Force
        } else {
            Speculation::Undecided(None)
        }
    }
}

/// First to a configured lap count.
struct FirstToLapX;

impl WinRule for FirstToLapX {
    fn always_eligible(&self) -> bool {
        true
    }

    fn has_result(&self, leader: &Competitor<'_>, field: &Field<'_>) -> bool {
        field.number_laps_win > 0 && leader.laps >= field.number_laps_win
    }

    fn in_reach(&self, other: &Competitor<'_>, leader: &Competitor<'_>, field: &Field<'_>) -> bool {
        field.is_team() || lap_reach(other, leader)
    }

    fn ties(&self, first: &Competitor<'_>, second: &Competitor<'_>, field: &Field<'_>) -> bool {
        first.laps == second.laps && (field.is_team() || first.total == second.total)
    }

    fn speculate(&self, _field: &Field<'_>, _signals: &dyn RaceSignals, _overtime: bool) -> Speculation {
        Speculation::Undecided(None)
    }
}

/// Single fastest lap (mean of members' fastest laps for teams).
struct FastestLap;

impl WinRule for FastestLap {
    fn view(&self) -> PrimaryLeaderboard {
        PrimaryLeaderboard::ByFastestLap
    }

    fn has_result(&self, leader: &Competitor<'_>, field: &Field<'_>) -> bool {
        if field.is_team() {
            leader.laps > 0
        } else {
            leader.fastest > 0.0
        }
    }

    fn in_reach(&self, _other: &Competitor<'_>, _leader: &Competitor<'_>, _field: &Field<'_>) -> bool {
        false
    }

    fn ties(&self, first: &Competitor<'_>, second: &Competitor<'_>, _field: &Field<'_>) -> bool {
        first.contribution == second.contribution && first.fastest == second.fastest
    }

    /// A lap still in the air can only beat the leader if it started late
    /// enough; the bound is how long the slowest such lap can take.
    fn speculate(&self, field: &Field<'_>, signals: &dyn RaceSignals, _overtime: bool) -> Speculation {
        let (Some(leader), Some(nominal)) = (field.leader(), signals.nominal_ms()) else {
            return Speculation::Undecided(None);
        };
        let fast = leader.fastest;
        if fast <= 0.0 {
            return Speculation::Undecided(None);
        }

        let bound = if field.is_team() {
            field
                .competitors
                .iter()
                .map(|team| {
                    let spent: TimeMs = team
                        .nodes
                        .iter()
                        .filter_map(|node| signals.last_crossing_ms(*node))
                        .map(|last| nominal - last)
                        .sum();
                    (fast * f64::from(team.members)) as TimeMs - spent
                })
                .fold(0, TimeMs::max)
        } else {
            let fast = fast as TimeMs;
            let slowest = field
                .competitors
                .iter()
                .flat_map(|c| c.nodes.iter())
                .filter_map(|node| signals.last_crossing_ms(*node))
                .map(|last| fast - (nominal - last))
                .fold(0, TimeMs::max);
            fast.min(slowest)
        };

        if bound <= 0 {
            Speculation::Force
        } else {
            Speculation::Undecided(Some(bound))
        }
    }
}

/// Best window of K consecutive laps (mean of members' windows for teams).
struct FastestConsecutive;

impl WinRule for FastestConsecutive {
    fn view(&self) -> PrimaryLeaderboard {
        PrimaryLeaderboard::ByConsecutives
    }

    fn has_result(&self, leader: &Competitor<'_>, field: &Field<'_>) -> bool {
        if field.is_team() {
            leader.laps >= field.k && leader.consecutives > 0.0
        } else {
            leader.base >= field.k && leader.consecutives > 0.0
        }
    }

    fn in_reach(&self, _other: &Competitor<'_>, _leader: &Competitor<'_>, _field: &Field<'_>) -> bool {
        false
    }

    fn ties(&self, first: &Competitor<'_>, second: &Competitor<'_>, field: &Field<'_>) -> bool {
        first.contribution == second.contribution
            && first.consecutives == second.consecutives
            && (field.is_team() || first.base == second.base)
    }

    /// One more lap completes a window with the last K-1 laps; the bound is
    /// the most time such a lap may take and still win.
    fn speculate(&self, field: &Field<'_>, signals: &dyn RaceSignals, _overtime: bool) -> Speculation {
        let Some(leader) = field.leader() else {
            return Speculation::Undecided(None);
        };
        let best = leader.consecutives;
        let tail = field.k.saturating_sub(1) as usize;
        if best <= 0.0 || tail == 0 {
            return Speculation::Undecided(None);
        }

        let recent_sum = |node: NodeIndex| {
            let recent = signals.recent_lap_times(node, tail);
            (recent.len() == tail).then(|| recent.iter().sum::<TimeMs>())
        };

        let bound = if field.is_team() {
            field
                .trailing()
                .map(|team| {
                    let total: TimeMs = team.nodes.iter().filter_map(|node| recent_sum(*node)).sum();
                    (best - total as f64 / f64::from(team.members.max(1))) as TimeMs
                })
                .fold(0, TimeMs::max)
        } else {
            field
                .competitors
                .iter()
                .flat_map(|c| c.nodes.iter())
                .filter_map(|node| recent_sum(*node))
                .map(|sum| best as TimeMs - sum)
                .fold(0, TimeMs::max)
        };

        if bound <= 0 {
            Speculation::Force
        } else {
            Speculation::Undecided(Some(bound))
        }
    }
}
