//! Live race state: seats, laps and the flags the win evaluator reads.

use thiserror::Error;

use crate::{
    engine::traits::RaceSignals,
    lap::{self, Lap, LapSource, Pilot, PilotRun, RaceFormat},
    types::{HeatId, NodeIndex, RaceStatus, StartBehavior, TimeMs},
};

/// Live race misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RaceError {
    /// Node index past the timer.
    #[error("no node {0}")]
    UnknownNode(NodeIndex),
    /// Nobody seated on the node.
    #[error("node {0} has no pilot")]
    EmptySeat(NodeIndex),
    /// Laps need a started race.
    #[error("race is not running")]
    NotRacing,
    /// No active lap with that number.
    #[error("node {node} has no lap {lap_number}")]
    UnknownLap {
        /// Node searched.
        node: NodeIndex,
        /// Requested lap number.
        lap_number: u32,
    },
}

/// One timer node and whoever flies on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSlot {
    /// Seated pilot.
    pub pilot: Option<Pilot>,
    /// Laps in crossing order, deleted ones included.
    pub laps: Vec<Lap>,
    /// A gate crossing is being timed right now.
    pub pass_crossing: bool,
    /// The pilot has completed the race.
    pub finished: bool,
    /// Part of the active frequency profile.
    pub enabled: bool,
}

impl NodeSlot {
    fn is_active(&self) -> bool {
        self.enabled && self.pilot.is_some()
    }
}

/// The race on the timer right now.
#[derive(Debug, Clone)]
pub struct RaceState {
    format: RaceFormat,
    heat_id: Option<HeatId>,
    status: RaceStatus,
    timer_running: bool,
    start_time_ms: u64,
    nodes: Vec<NodeSlot>,
}

impl RaceState {
    /// Idle race with `node_count` empty seats.
    pub fn new(node_count: usize, format: RaceFormat) -> Self {
        let nodes = (0..node_count)
            .map(|_| NodeSlot {
                enabled: true,
                ..NodeSlot::default()
            })
            .collect();
        Self {
            format,
            heat_id: None,
            status: RaceStatus::Ready,
            timer_running: false,
            start_time_ms: 0,
            nodes,
        }
    }

    /// Format flown now.
    pub fn format(&self) -> &RaceFormat {
        &self.format
    }

    /// Replaces the format. Laps already recorded are kept.
    pub fn set_format(&mut self, format: RaceFormat) {
        self.format = format;
    }

    /// Heat the live race counts toward.
    pub fn heat_id(&self) -> Option<HeatId> {
        self.heat_id
    }

    /// Selects the heat the race counts toward.
    pub fn set_heat(&mut self, heat_id: Option<HeatId>) {
        self.heat_id = heat_id;
    }

    /// Wall-clock start, epoch millis.
    pub fn start_time_ms(&self) -> u64 {
        self.start_time_ms
    }

    /// Seat at `node`.
    pub fn node(&self, node: NodeIndex) -> Option<&NodeSlot> {
        self.nodes.get(node)
    }

    /// Seats on the timer, enabled or not.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Seats `pilot` on `node`, or empties the seat with `None`.
    pub fn seat(&mut self, node: NodeIndex, pilot: Option<Pilot>) -> Result<(), RaceError> {
        self.slot_mut(node)?.pilot = pilot;
        Ok(())
    }

    /// Disabled seats are skipped by scoring and win checks.
    pub fn set_enabled(&mut self, node: NodeIndex, enabled: bool) -> Result<(), RaceError> {
        self.slot_mut(node)?.enabled = enabled;
        Ok(())
    }

    /// Clears laps and flags and starts the clock. `start_time_ms` is wall
    /// time; lap timestamps stay relative to it.
    pub fn start(&mut self, start_time_ms: u64) {
        self.clear_laps();
        self.start_time_ms = start_time_ms;
        self.status = RaceStatus::Racing;
        self.timer_running = true;
    }

    /// Ends the race; laps may still be recorded until it is cleared.
    pub fn stop(&mut self) {
        self.status = RaceStatus::Done;
        self.timer_running = false;
    }

    /// Nominal race time has elapsed. Unlimited races ignore this.
    pub fn expire_timer(&mut self) {
        if self.status == RaceStatus::Racing && self.format.race_time_ms.is_some() {
            self.timer_running = false;
        }
    }

    /// Back to `Ready` with every lap and flag discarded.
    pub fn clear(&mut self) {
        self.clear_laps();
        self.status = RaceStatus::Ready;
        self.timer_running = false;
        self.start_time_ms = 0;
    }

    /// Records a crossing. A crossing after time expiry finishes the seat,
    /// and clears its pending-crossing flag either way.
    pub fn add_lap(&mut self, node: NodeIndex, timestamp_ms: TimeMs, source: LapSource) -> Result<Lap, RaceError> {
        if !matches!(self.status, RaceStatus::Racing | RaceStatus::Done) {
            return Err(RaceError::NotRacing);
        }
        let expired = !self.timer_running && self.format.race_time_ms.is_some();
        let slot = self.slot_mut(node)?;
        let pilot_id = slot.pilot.as_ref().ok_or(RaceError::EmptySeat(node))?.id;
        let lap = lap::append_lap(&mut slot.laps, pilot_id, node, timestamp_ms, source);
        slot.pass_crossing = false;
        if expired {
            slot.finished = true;
        }
        Ok(lap)
    }

    /// Soft-deletes a live lap and renumbers the rest.
    pub fn delete_lap(&mut self, node: NodeIndex, lap_number: u32) -> Result<(), RaceError> {
        let slot = self.slot_mut(node)?;
        if !lap::delete_lap(&mut slot.laps, lap_number) {
            return Err(RaceError::UnknownLap { node, lap_number });
        }
        Ok(())
    }

    /// Marks a pilot as inside the gate capture window.
    pub fn set_crossing(&mut self, node: NodeIndex, crossing: bool) -> Result<(), RaceError> {
        self.slot_mut(node)?.pass_crossing = crossing;
        Ok(())
    }

    /// Marks the pilot as done flying.
    pub fn set_finished(&mut self, node: NodeIndex) -> Result<(), RaceError> {
        self.slot_mut(node)?.finished = true;
        Ok(())
    }

    /// Seated, enabled nodes in node order.
    pub fn active_nodes(&self) -> impl Iterator<Item = (NodeIndex, &NodeSlot)> {
        self.nodes.iter().enumerate().filter(|(_, slot)| slot.is_active())
    }

    /// Per-pilot laps of every active seat, ready to be saved.
    pub fn runs(&self) -> Vec<PilotRun> {
        self.active_nodes()
            .filter_map(|(node, slot)| {
                slot.pilot.as_ref().map(|pilot| PilotRun {
                    pilot_id: pilot.id,
                    node_index: node,
                    laps: slot.laps.clone(),
                })
            })
            .collect()
    }

    /// Any active seat has an active lap.
    pub fn has_laps(&self) -> bool {
        self.active_nodes()
            .any(|(_, slot)| slot.laps.iter().any(|lap| !lap.deleted))
    }

    fn clear_laps(&mut self) {
        for slot in &mut self.nodes {
            slot.laps.clear();
            slot.pass_crossing = false;
            slot.finished = false;
        }
    }

    fn slot_mut(&mut self, node: NodeIndex) -> Result<&mut NodeSlot, RaceError> {
        self.nodes.get_mut(node).ok_or(RaceError::UnknownNode(node))
    }
}

impl RaceSignals for RaceState {
    fn status(&self) -> RaceStatus {
        self.status
    }

    fn timer_running(&self) -> bool {
        self.timer_running
    }

    fn crossing_in_progress(&self, node: NodeIndex) -> bool {
        self.nodes.get(node).is_some_and(|slot| slot.pass_crossing)
    }

    fn has_finished(&self, node: NodeIndex) -> bool {
        self.nodes.get(node).is_some_and(|slot| slot.finished)
    }

    fn all_finished(&self) -> bool {
        let mut active = self.active_nodes().peekable();
        active.peek().is_some() && active.all(|(_, slot)| slot.finished)
    }

    fn nominal_ms(&self) -> Option<TimeMs> {
        self.format.race_time_ms
    }

    fn last_crossing_ms(&self, node: NodeIndex) -> Option<TimeMs> {
        self.nodes
            .get(node)?
            .laps
            .iter()
            .rev()
            .find(|lap| !lap.deleted)
            .map(|lap| lap.timestamp_ms)
    }

    fn recent_lap_times(&self, node: NodeIndex, n: usize) -> Vec<TimeMs> {
        let Some(slot) = self.nodes.get(node) else {
            return Vec::new();
        };
        let counts_holeshot = self.format.start_behavior == StartBehavior::FirstLap;
        let counted: Vec<TimeMs> = slot
            .laps
            .iter()
            .filter(|lap| !lap.deleted && (counts_holeshot || lap.lap_number > 0))
            .map(|lap| lap.lap_time_ms)
            .collect();
        counted[counted.len().saturating_sub(n)..].to_vec()
    }
}
