use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    cache::{ResultsCache, SlotEntry},
    config::ScoringConfig,
    core::{
        race::{RaceError, RaceState},
        source::StoreSource,
        store::{RecordStore, StoreError, now_ms},
    },
    engine::{
        gap::{GapInfo, gap_info},
        points::Ranking,
        team::{TeamLeaderboard, team_leaderboard},
        win::{WinCheck, WinResult, WinTracker, check_win_condition},
    },
    lap::{FormatPatch, Lap, LapSource},
    leaderboard::Leaderboard,
    persist::{CacheSink, PersistError},
    types::{ClassId, FormatId, HeatId, NodeIndex, PilotId, RaceId, Scope, TimeMs},
};

use super::events::RaceEvent;

/// Errors returned through [`RaceControlHandle`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Record store rejected the change.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Live race rejected the change.
    #[error(transparent)]
    Race(#[from] RaceError),
    /// Cache persistence failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// Save requested with no heat staged.
    #[error("no heat selected for the live race")]
    NoHeat,
    /// The runtime task has exited.
    #[error("runtime channel closed")]
    ChannelClosed,
}

/// Queue sizes and persistence batching.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Pending commands before callers wait.
    pub command_queue_bound: usize,
    /// Broadcast buffer; slow subscribers lag past it.
    pub event_queue_bound: usize,
    /// Pending persistence batches.
    pub persist_queue_bound: usize,
    /// Entries buffered before a write.
    pub batch_max_entries: usize,
    /// Longest an entry waits before a write.
    pub batch_max_latency_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_queue_bound: 256,
            event_queue_bound: 1024,
            persist_queue_bound: 64,
            batch_max_entries: 32,
            batch_max_latency_ms: 75,
        }
    }
}

/// Who flies where in the next race.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RaceSetup {
    /// Heat the race counts toward.
    pub heat_id: Option<HeatId>,
    /// Format to fly; `None` keeps the current one.
    pub format_id: Option<FormatId>,
    /// `(node, pilot)` pairs; unlisted nodes are emptied.
    pub seats: Vec<(NodeIndex, PilotId)>,
}

/// Cloneable handle to the race-control loop.
pub struct RaceControlHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<RaceEvent>,
}

impl Clone for RaceControlHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, RuntimeError>>;

enum Command {
    StageRace { setup: RaceSetup, resp: Reply<()> },
    StartRace { resp: Reply<()> },
    RecordCrossing { node: NodeIndex, timestamp_ms: TimeMs, source: LapSource, resp: Reply<Lap> },
    DeleteLap { node: NodeIndex, lap_number: u32, resp: Reply<()> },
    SetCrossingFlag { node: NodeIndex, crossing: bool, resp: Reply<()> },
    SetFinished { node: NodeIndex, resp: Reply<()> },
    ExpireTimer { resp: Reply<WinResult> },
    StopRace { resp: Reply<WinResult> },
    SaveRace { resp: Reply<RaceId> },
    CurrentResults { resp: Reply<Option<Arc<Leaderboard>>> },
    TeamResults { resp: Reply<Option<TeamLeaderboard>> },
    GapInfo { node: NodeIndex, resp: Reply<Option<GapInfo>> },
    CheckWin { resp: Reply<WinResult> },
    Results { scope: Scope, resp: Reply<Option<Arc<Leaderboard>>> },
    ClassRanking { class_id: ClassId, resp: Reply<Option<Arc<Ranking>>> },
    AddSavedLap { race_id: RaceId, pilot_id: PilotId, timestamp_ms: TimeMs, resp: Reply<u32> },
    DeleteSavedLap { race_id: RaceId, pilot_id: PilotId, lap_number: u32, resp: Reply<()> },
    ReassignRace { race_id: RaceId, heat_id: HeatId, resp: Reply<()> },
    ReassignHeatClass { heat_id: HeatId, class_id: Option<ClassId>, resp: Reply<()> },
    AlterFormat { format_id: FormatId, patch: FormatPatch, resp: Reply<()> },
    Flush { resp: Reply<u64> },
    Shutdown { resp: Reply<()> },
}

enum PersistMsg {
    Entries(Vec<(Scope, SlotEntry)>),
    Flush { resp: oneshot::Sender<Result<u64, PersistError>> },
    Shutdown { resp: oneshot::Sender<()> },
}

struct RaceControl {
    store: Arc<RwLock<RecordStore>>,
    race: Arc<RwLock<RaceState>>,
    cache: ResultsCache<StoreSource>,
    tracker: WinTracker,
    events_tx: broadcast::Sender<RaceEvent>,
    persist_tx: Option<mpsc::Sender<PersistMsg>>,
}

/// Spawns the single-writer race-control loop.
///
/// With a sink, cache entries persisted by an earlier run are restored
/// first; entries that were not fresh are rebuilt on first read.
pub fn spawn_race_control(
    source: StoreSource,
    scoring: ScoringConfig,
    sink: Option<Box<dyn CacheSink>>,
    config: RuntimeConfig,
) -> RaceControlHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_queue_bound);
    let (events_tx, _) = broadcast::channel::<RaceEvent>(config.event_queue_bound);

    let store = Arc::clone(source.store());
    let race = Arc::clone(source.race());
    let cache = ResultsCache::new(Arc::new(source), scoring);

    let (persist_tx, mut durable_rx) = match sink {
        Some(mut sink) => {
            match sink.load_entries() {
                Ok(loaded) => {
                    let restored = loaded.len();
                    let demoted = cache.restore(loaded);
                    info!(restored, demoted, "cache restored");
                }
                Err(err) => warn!(error = %err, "cache restore failed, starting cold"),
            }
            let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound);
            let (durable_tx, durable_rx) = mpsc::unbounded_channel::<u64>();
            spawn_persistence_worker(sink, persist_rx, durable_tx, config.clone());
            (Some(persist_tx), Some(durable_rx))
        }
        None => (None, None),
    };

    let mut control = RaceControl {
        store,
        race,
        cache,
        tracker: WinTracker::new(),
        events_tx: events_tx.clone(),
        persist_tx,
    };

    tokio::spawn(async move {
        loop {
            if let Some(rx) = durable_rx.as_mut() {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break; };
                        if control.handle_command(cmd).await {
                            break;
                        }
                    }
                    durable = rx.recv() => {
                        if let Some(entries) = durable {
                            control.emit(RaceEvent::CachePersisted { entries });
                        }
                    }
                }
            } else {
                let Some(cmd) = cmd_rx.recv().await else { break; };
                if control.handle_command(cmd).await {
                    break;
                }
            }
        }
    });

    RaceControlHandle { cmd_tx, events_tx }
}

impl RaceControlHandle {
    /// Receives every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RaceEvent> {
        self.events_tx.subscribe()
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Seats pilots and selects heat and format. Clears the live race.
    pub async fn stage_race(&self, setup: RaceSetup) -> Result<(), RuntimeError> {
        self.call(|resp| Command::StageRace { setup, resp }).await
    }

    /// Starts the staged race and resets the win state.
    pub async fn start_race(&self) -> Result<(), RuntimeError> {
        self.call(|resp| Command::StartRace { resp }).await
    }

    /// Records a gate crossing at `timestamp_ms` after race start.
    pub async fn record_crossing(
        &self,
        node: NodeIndex,
        timestamp_ms: TimeMs,
        source: LapSource,
    ) -> Result<Lap, RuntimeError> {
        self.call(|resp| Command::RecordCrossing {
            node,
            timestamp_ms,
            source,
            resp,
        })
        .await
    }

    /// Soft-deletes a live lap.
    pub async fn delete_lap(&self, node: NodeIndex, lap_number: u32) -> Result<(), RuntimeError> {
        self.call(|resp| Command::DeleteLap { node, lap_number, resp }).await
    }

    /// Holds the win call while a crossing on `node` is in progress.
    pub async fn set_crossing_flag(&self, node: NodeIndex, crossing: bool) -> Result<(), RuntimeError> {
        self.call(|resp| Command::SetCrossingFlag { node, crossing, resp }).await
    }

    /// Marks a seat as done flying.
    pub async fn set_finished(&self, node: NodeIndex) -> Result<(), RuntimeError> {
        self.call(|resp| Command::SetFinished { node, resp }).await
    }

    /// Nominal race time reached; runs the at-finish win check.
    pub async fn expire_timer(&self) -> Result<WinResult, RuntimeError> {
        self.call(|resp| Command::ExpireTimer { resp }).await
    }

    /// Stops the race and runs the win check.
    pub async fn stop_race(&self) -> Result<WinResult, RuntimeError> {
        self.call(|resp| Command::StopRace { resp }).await
    }

    /// Saves the live race into its heat and clears it.
    pub async fn save_race(&self) -> Result<RaceId, RuntimeError> {
        self.call(|resp| Command::SaveRace { resp }).await
    }

    /// Live race leaderboard.
    pub async fn current_results(&self) -> Result<Option<Arc<Leaderboard>>, RuntimeError> {
        self.call(|resp| Command::CurrentResults { resp }).await
    }

    /// `None` unless the live format races teams.
    pub async fn team_results(&self) -> Result<Option<TeamLeaderboard>, RuntimeError> {
        self.call(|resp| Command::TeamResults { resp }).await
    }

    /// Split to the next and first positions for `node`.
    pub async fn gap_info(&self, node: NodeIndex) -> Result<Option<GapInfo>, RuntimeError> {
        self.call(|resp| Command::GapInfo { node, resp }).await
    }

    /// Runs the win check against the live board.
    pub async fn check_win(&self) -> Result<WinResult, RuntimeError> {
        self.call(|resp| Command::CheckWin { resp }).await
    }

    /// Leaderboard for any scope, rebuilt only if stale.
    pub async fn results(&self, scope: Scope) -> Result<Option<Arc<Leaderboard>>, RuntimeError> {
        self.call(|resp| Command::Results { scope, resp }).await
    }

    /// Cached class ranking.
    pub async fn class_ranking(&self, class_id: ClassId) -> Result<Option<Arc<Ranking>>, RuntimeError> {
        self.call(|resp| Command::ClassRanking { class_id, resp }).await
    }

    /// Adds a manual lap to a saved race. Returns its lap number.
    pub async fn add_saved_lap(
        &self,
        race_id: RaceId,
        pilot_id: PilotId,
        timestamp_ms: TimeMs,
    ) -> Result<u32, RuntimeError> {
        self.call(|resp| Command::AddSavedLap {
            race_id,
            pilot_id,
            timestamp_ms,
            resp,
        })
        .await
    }

    /// Soft-deletes a lap of a saved race.
    pub async fn delete_saved_lap(
        &self,
        race_id: RaceId,
        pilot_id: PilotId,
        lap_number: u32,
    ) -> Result<(), RuntimeError> {
        self.call(|resp| Command::DeleteSavedLap {
            race_id,
            pilot_id,
            lap_number,
            resp,
        })
        .await
    }

    /// Moves a saved race to another heat.
    pub async fn reassign_race(&self, race_id: RaceId, heat_id: HeatId) -> Result<(), RuntimeError> {
        self.call(|resp| Command::ReassignRace { race_id, heat_id, resp }).await
    }

    /// Moves a heat into a class, or out of every class.
    pub async fn reassign_heat_class(&self, heat_id: HeatId, class_id: Option<ClassId>) -> Result<(), RuntimeError> {
        self.call(|resp| Command::ReassignHeatClass { heat_id, class_id, resp }).await
    }

    /// Patches a format; the live race picks it up.
    pub async fn alter_format(&self, format_id: FormatId, patch: FormatPatch) -> Result<(), RuntimeError> {
        self.call(|resp| Command::AlterFormat { format_id, patch, resp }).await
    }

    /// Waits until every cache entry changed so far is on disk. Returns the
    /// running count written.
    pub async fn flush(&self) -> Result<u64, RuntimeError> {
        self.call(|resp| Command::Flush { resp }).await
    }

    /// Flushes pending cache entries and stops the loop.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.call(|resp| Command::Shutdown { resp }).await
    }
}

impl RaceControl {
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::StageRace { setup, resp } => {
                let res = self.stage(setup);
                if res.is_ok() {
                    self.live_changed().await;
                }
                let _ = resp.send(res);
            }
            Command::StartRace { resp } => {
                self.race.write().start(now_ms());
                self.tracker.reset();
                let _ = resp.send(Ok(()));
                self.live_changed().await;
            }
            Command::RecordCrossing {
                node,
                timestamp_ms,
                source,
                resp,
            } => {
                let res = self.race.write().add_lap(node, timestamp_ms, source);
                let res = res.map_err(RuntimeError::from);
                if let Ok(lap) = &res {
                    debug!(node, lap_number = lap.lap_number, timestamp_ms, "lap recorded");
                    self.emit(RaceEvent::LapRecorded { node, lap: lap.clone() });
                    self.live_changed().await;
                }
                let _ = resp.send(res);
            }
            Command::DeleteLap { node, lap_number, resp } => {
                let res = self.race.write().delete_lap(node, lap_number);
                let res = res.map_err(RuntimeError::from);
                if res.is_ok() {
                    self.emit(RaceEvent::LapDeleted { node, lap_number });
                    self.live_changed().await;
                }
                let _ = resp.send(res);
            }
            Command::SetCrossingFlag { node, crossing, resp } => {
                let res = self.race.write().set_crossing(node, crossing).map_err(RuntimeError::from);
                if res.is_ok() {
                    self.evaluate(WinCheck::default()).await;
                }
                let _ = resp.send(res);
            }
            Command::SetFinished { node, resp } => {
                let res = self.race.write().set_finished(node).map_err(RuntimeError::from);
                if res.is_ok() {
                    self.evaluate(WinCheck::default()).await;
                }
                let _ = resp.send(res);
            }
            Command::ExpireTimer { resp } => {
                self.race.write().expire_timer();
                let result = self
                    .evaluate(WinCheck {
                        forced: false,
                        at_finish: true,
                    })
                    .await;
                let _ = resp.send(Ok(result));
            }
            Command::StopRace { resp } => {
                self.race.write().stop();
                let result = self.evaluate(WinCheck::default()).await;
                let _ = resp.send(Ok(result));
            }
            Command::SaveRace { resp } => {
                let res = self.save();
                if let Ok(race_id) = res {
                    info!(race_id, "race saved");
                    self.tracker.reset();
                    self.live_changed().await;
                }
                let _ = resp.send(res);
            }
            Command::CurrentResults { resp } => {
                let _ = resp.send(Ok(self.cache.results(Scope::Current).await));
            }
            Command::TeamResults { resp } => {
                let mode = self.race.read().format().team_mode;
                let teams = if mode.is_team() {
                    self.cache
                        .results(Scope::Current)
                        .await
                        .and_then(|board| team_leaderboard(&board, mode))
                } else {
                    None
                };
                let _ = resp.send(Ok(teams));
            }
            Command::GapInfo { node, resp } => {
                let info = self
                    .cache
                    .results(Scope::Current)
                    .await
                    .and_then(|board| gap_info(&board, node));
                let _ = resp.send(Ok(info));
            }
            Command::CheckWin { resp } => {
                let result = self.evaluate(WinCheck::default()).await;
                let _ = resp.send(Ok(result));
            }
            Command::Results { scope, resp } => {
                let _ = resp.send(Ok(self.cache.results(scope).await));
            }
            Command::ClassRanking { class_id, resp } => {
                let _ = resp.send(Ok(self.cache.class_ranking(class_id).await));
            }
            Command::AddSavedLap {
                race_id,
                pilot_id,
                timestamp_ms,
                resp,
            } => {
                let res = self
                    .store
                    .write()
                    .add_saved_lap(race_id, pilot_id, timestamp_ms, LapSource::Manual)
                    .map(|(lap_number, _)| lap_number);
                let _ = resp.send(self.records_changed(res));
            }
            Command::DeleteSavedLap {
                race_id,
                pilot_id,
                lap_number,
                resp,
            } => {
                let res = self.store.write().delete_lap(race_id, pilot_id, lap_number).map(|_| ());
                let _ = resp.send(self.records_changed(res));
            }
            Command::ReassignRace { race_id, heat_id, resp } => {
                let res = self.store.write().reassign_race(race_id, heat_id).map(|_| ());
                let _ = resp.send(self.records_changed(res));
            }
            Command::ReassignHeatClass { heat_id, class_id, resp } => {
                let res = self.store.write().reassign_heat_class(heat_id, class_id).map(|_| ());
                let _ = resp.send(self.records_changed(res));
            }
            Command::AlterFormat { format_id, patch, resp } => {
                let res = self.store.write().alter_format(format_id, patch).map(|_| ());
                if res.is_ok() {
                    self.refresh_live_format(format_id);
                }
                let _ = resp.send(self.records_changed(res));
            }
            Command::Flush { resp } => {
                let _ = resp.send(self.flush().await);
            }
            Command::Shutdown { resp } => {
                let _ = resp.send(self.shutdown_persistence().await);
                return true;
            }
        }

        self.persist_dirty();
        false
    }

    fn stage(&mut self, setup: RaceSetup) -> Result<(), RuntimeError> {
        let store = self.store.read();
        if let Some(heat_id) = setup.heat_id {
            store.heat(heat_id).ok_or(StoreError::UnknownHeat(heat_id))?;
        }
        let format = match setup.format_id {
            Some(id) => Some(store.format(id).cloned().ok_or(StoreError::UnknownFormat(id))?),
            None => None,
        };
        let mut seats = Vec::with_capacity(setup.seats.len());
        for (node, pilot_id) in &setup.seats {
            let pilot = store.pilot(*pilot_id).cloned().ok_or(StoreError::UnknownPilot(*pilot_id))?;
            seats.push((*node, pilot));
        }
        drop(store);

        let mut race = self.race.write();
        if let Some(node) = seats.iter().map(|(node, _)| *node).find(|node| *node >= race.node_count()) {
            return Err(RaceError::UnknownNode(node).into());
        }
        race.clear();
        for node in 0..race.node_count() {
            race.seat(node, None)?;
        }
        for (node, pilot) in seats {
            race.seat(node, Some(pilot))?;
        }
        if let Some(format) = format {
            race.set_format(format);
        }
        race.set_heat(setup.heat_id);
        drop(race);
        self.tracker.reset();
        Ok(())
    }

    fn save(&mut self) -> Result<RaceId, RuntimeError> {
        let (heat_id, format_id, start_time_ms, runs) = {
            let race = self.race.read();
            let heat_id = race.heat_id().ok_or(RuntimeError::NoHeat)?;
            (heat_id, race.format().id, race.start_time_ms(), race.runs())
        };
        let race_id = {
            let mut store = self.store.write();
            let format_id = store.format(format_id).map(|format| format.id);
            store.save_race(heat_id, format_id, start_time_ms, runs)?.0
        };
        self.race.write().clear();
        self.apply_store_ops();
        self.emit(RaceEvent::RaceSaved { race_id, heat_id });
        Ok(race_id)
    }

    fn refresh_live_format(&mut self, format_id: FormatId) {
        let format = self.store.read().format(format_id).cloned();
        let mut race = self.race.write();
        if let Some(format) = format.filter(|_| race.format().id == format_id) {
            race.set_format(format);
        }
    }

    fn records_changed<T>(&mut self, res: Result<T, StoreError>) -> Result<T, RuntimeError> {
        let out = res.map_err(RuntimeError::from);
        if out.is_ok() {
            self.apply_store_ops();
        }
        out
    }

    /// Invalidates whatever the store's pending ops touched.
    fn apply_store_ops(&mut self) {
        let scopes = {
            let mut store = self.store.write();
            let ops = store.drain_pending_ops();
            let mut scopes = Vec::new();
            for stored in &ops {
                for scope in stored.op.touched_scopes(&store) {
                    if !scopes.contains(&scope) {
                        scopes.push(scope);
                    }
                }
            }
            scopes
        };
        if scopes.is_empty() {
            return;
        }
        let touched = self.cache.invalidate_scopes(&scopes);
        self.emit(RaceEvent::ResultsInvalidated { scopes: touched });
    }

    /// The live race changed: invalidate, rebuild, and run the win check.
    async fn live_changed(&mut self) {
        let touched = self.cache.invalidate_with_dependents(Scope::Current);
        self.emit(RaceEvent::ResultsInvalidated { scopes: touched });
        self.evaluate(WinCheck::default()).await;
    }

    async fn evaluate(&mut self, check: WinCheck) -> WinResult {
        let Some(board) = self.cache.results(Scope::Current).await else {
            return self.tracker.current().clone();
        };
        let result = {
            let race = self.race.read();
            check_win_condition(&board, race.format(), &*race, check)
        };
        if self.tracker.observe(result.clone()) {
            self.emit(RaceEvent::WinStatusChanged {
                result: self.tracker.current().clone(),
            });
        }
        result
    }

    /// Hands dirty entries to the persistence worker without waiting. While
    /// the queue is full they stay dirty and go out on a later pass.
    fn persist_dirty(&mut self) {
        let Some(tx) = &self.persist_tx else {
            self.cache.drain_dirty();
            return;
        };
        let permit = match tx.try_reserve() {
            Ok(permit) => permit,
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("persist queue full, cache entries stay dirty");
                return;
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                let dropped = self.cache.drain_dirty().len();
                warn!(dropped, "persist worker gone, cache entries not written");
                return;
            }
        };
        let dirty = self.cache.drain_dirty();
        if !dirty.is_empty() {
            permit.send(PersistMsg::Entries(dirty));
        }
    }

    /// Waits for queue room so every dirty entry reaches the worker.
    async fn persist_all_dirty(&mut self, tx: &mpsc::Sender<PersistMsg>) -> Result<(), RuntimeError> {
        let dirty = self.cache.drain_dirty();
        if dirty.is_empty() {
            return Ok(());
        }
        tx.send(PersistMsg::Entries(dirty))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)
    }

    async fn flush(&mut self) -> Result<u64, RuntimeError> {
        let Some(tx) = self.persist_tx.clone() else {
            self.cache.drain_dirty();
            return Ok(0);
        };
        self.persist_all_dirty(&tx).await?;
        let (flush_tx, flush_rx) = oneshot::channel();
        tx.send(PersistMsg::Flush { resp: flush_tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        flush_rx
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?
            .map_err(RuntimeError::from)
    }

    async fn shutdown_persistence(&mut self) -> Result<(), RuntimeError> {
        let Some(tx) = self.persist_tx.clone() else {
            return Ok(());
        };
        self.persist_all_dirty(&tx).await?;
        let (done_tx, done_rx) = oneshot::channel();
        tx.send(PersistMsg::Shutdown { resp: done_tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        done_rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    fn emit(&self, event: RaceEvent) {
        let _ = self.events_tx.send(event);
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn CacheSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<u64>,
    config: RuntimeConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let mut buf = Vec::<(Scope, SlotEntry)>::new();
        let mut deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
        let mut written: u64 = 0;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut written, &durable_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Entries(entries) => {
                            merge_pending(&mut buf, entries);
                            if buf.len() >= config.batch_max_entries {
                                let _ = flush_buf(&sink, &mut buf, &mut written, &durable_tx, false).await;
                                deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut written, &durable_tx, true).await;
                            let _ = resp.send(result.map(|_| written));
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Shutdown { resp } => {
                            let _ = flush_buf(&sink, &mut buf, &mut written, &durable_tx, true).await;
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let _ = flush_buf(&sink, &mut buf, &mut written, &durable_tx, false).await;
                    deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                }
            }
        }
    });
}

/// Later writes of the same slot replace earlier ones still buffered.
fn merge_pending(buf: &mut Vec<(Scope, SlotEntry)>, entries: Vec<(Scope, SlotEntry)>) {
    for (scope, entry) in entries {
        match buf
            .iter_mut()
            .find(|(s, e)| *s == scope && e.slot() == entry.slot())
        {
            Some(slot) => slot.1 = entry,
            None => buf.push((scope, entry)),
        }
    }
}

async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn CacheSink>>>,
    buf: &mut Vec<(Scope, SlotEntry)>,
    written: &mut u64,
    durable_tx: &mpsc::UnboundedSender<u64>,
    call_flush: bool,
) -> Result<(), PersistError> {
    if buf.is_empty() {
        if call_flush {
            let sink_ref = Arc::clone(sink);
            tokio::task::spawn_blocking(move || {
                let mut sink = sink_ref.blocking_lock();
                sink.flush()
            })
            .await
            .map_err(|e| PersistError::Message(format!("join error: {e}")))??;
        }
        return Ok(());
    }

    let entries = std::mem::take(buf);
    let sink_ref = Arc::clone(sink);
    let store_res: Result<usize, PersistError> = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        let count = sink.store_entries(&entries)?;
        if call_flush {
            sink.flush()?;
        }
        Ok(count)
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?;

    match store_res {
        Ok(count) => {
            *written += count as u64;
            let _ = durable_tx.send(*written);
            Ok(())
        }
        Err(err) => {
            warn!(error = %err, "cache entries not persisted");
            Err(err)
        }
    }
}
