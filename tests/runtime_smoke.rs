use std::sync::Arc;

use heatboard::{
    config::ScoringConfig,
    core::{
        race::{RaceError, RaceState},
        source::StoreSource,
        store::RecordStore,
    },
    engine::win::Winner,
    lap::{FormatPatch, LapSource, RaceFormat},
    persist::{CacheSink, sqlite::SqliteCacheSink},
    runtime::{
        events::RaceEvent,
        handle::{RaceControlHandle, RaceSetup, RuntimeConfig, RuntimeError, spawn_race_control},
    },
    types::{ClassId, FormatId, HeatId, PilotId, Scope, TeamMode, TimeMs, WinStatus},
};
use parking_lot::RwLock;

const STEADY: [TimeMs; 6] = [2_000, 13_600, 25_200, 36_800, 48_400, 60_000];
const QUICK: [TimeMs; 6] = [2_000, 13_200, 24_400, 35_600, 46_800, 58_000];

struct Event {
    pilots: [PilotId; 2],
    format: FormatId,
    class: ClassId,
    heat: HeatId,
}

fn event_source() -> (StoreSource, Event) {
    let mut store = RecordStore::new();
    let (ace, _) = store.add_pilot("ACE", "Red");
    let (bolt, _) = store.add_pilot("BOLT", "Blue");
    let (format, _) = store.add_format(RaceFormat::new("Open"));
    let (class, _) = store.add_class("Open", Some(format)).expect("class");
    let (heat, _) = store.add_heat(Some("Heat 1".into()), Some(class)).expect("heat");

    let source = StoreSource::new(
        Arc::new(RwLock::new(store)),
        Arc::new(RwLock::new(RaceState::new(4, RaceFormat::new("Practice")))),
        3,
    );
    let event = Event {
        pilots: [ace, bolt],
        format,
        class,
        heat,
    };
    (source, event)
}

fn spawn(sink: Option<Box<dyn CacheSink>>) -> (RaceControlHandle, Event) {
    spawn_with(sink, RuntimeConfig::default())
}

fn spawn_with(sink: Option<Box<dyn CacheSink>>, config: RuntimeConfig) -> (RaceControlHandle, Event) {
    let (source, event) = event_source();
    let handle = spawn_race_control(source, ScoringConfig::default(), sink, config);
    (handle, event)
}

async fn stage_and_start(handle: &RaceControlHandle, event: &Event) {
    handle
        .stage_race(RaceSetup {
            heat_id: Some(event.heat),
            format_id: Some(event.format),
            seats: vec![(0, event.pilots[0]), (1, event.pilots[1])],
        })
        .await
        .expect("stage");
    handle.start_race().await.expect("start");
}

async fn fly(handle: &RaceControlHandle, node: usize, stamps: &[TimeMs]) {
    for ts in stamps {
        handle
            .record_crossing(node, *ts, LapSource::Realtime)
            .await
            .expect("crossing");
    }
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<RaceEvent>) -> Vec<RaceEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn race_flows_from_stage_to_saved_results() {
    let (handle, event) = spawn(None);
    let mut rx = handle.subscribe();

    stage_and_start(&handle, &event).await;
    fly(&handle, 0, &STEADY).await;
    fly(&handle, 1, &QUICK).await;

    let live = handle.current_results().await.expect("results").expect("live board");
    assert_eq!(live.by_race_time[0].pilot_id, event.pilots[1]);
    assert_eq!(live.by_race_time[0].laps, 5);
    assert_eq!(live.by_race_time[1].time_behind_raw, Some(2_000));

    let gap = handle.gap_info(0).await.expect("gap").expect("seat on board");
    assert_eq!(gap.current.position, 2);
    assert_eq!(gap.next_rank.expect("ahead").split_ms, 2_000);

    let result = handle.stop_race().await.expect("stop");
    assert_eq!(result.status, WinStatus::Declared);
    assert!(matches!(&result.data, Some(Winner::Pilot(row)) if row.pilot_id == event.pilots[1]));

    let race_id = handle.save_race().await.expect("save");
    let live = handle.current_results().await.expect("results").expect("seats stay");
    assert_eq!(live.by_race_time[0].laps, 0);

    let race = handle.results(Scope::Race(race_id)).await.expect("results").expect("race");
    let heat = handle.results(Scope::Heat(event.heat)).await.expect("results").expect("heat");
    let whole = handle.results(Scope::Event).await.expect("results").expect("event");
    let order = |board: &heatboard::leaderboard::Leaderboard| -> Vec<(PilotId, u32)> {
        board.by_race_time.iter().map(|row| (row.pilot_id, row.laps)).collect()
    };
    assert_eq!(order(&race), order(&heat));
    assert_eq!(whole.by_race_time[0].laps, 5);

    let ranking = handle.class_ranking(event.class).await.expect("ranking").expect("class ranking");
    assert_eq!(ranking.rows.len(), 2);
    assert_eq!(ranking.rows[0].pilot_id, event.pilots[1]);

    let events = drain(&mut rx);
    let laps = events
        .iter()
        .filter(|e| matches!(e, RaceEvent::LapRecorded { .. }))
        .count();
    assert_eq!(laps, 12);
    assert!(events.iter().any(|e| matches!(
        e,
        RaceEvent::WinStatusChanged { result } if result.status == WinStatus::Declared
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        RaceEvent::RaceSaved { race_id: id, heat_id } if *id == race_id && *heat_id == event.heat
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        RaceEvent::ResultsInvalidated { scopes } if scopes.contains(&Scope::Event)
    )));

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn expiry_waits_then_late_lap_decides() {
    let (handle, event) = spawn(None);
    stage_and_start(&handle, &event).await;
    fly(&handle, 0, &STEADY).await;
    fly(&handle, 1, &QUICK).await;

    let at_finish = handle.expire_timer().await.expect("expire");
    assert_eq!(at_finish.status, WinStatus::None);

    fly(&handle, 0, &[125_000]).await;
    let result = handle.check_win().await.expect("check");
    assert_eq!(result.status, WinStatus::Declared);
    assert!(matches!(&result.data, Some(Winner::Pilot(row)) if row.pilot_id == event.pilots[0]));
}

#[tokio::test]
async fn pending_crossing_holds_the_result() {
    let (handle, event) = spawn(None);
    stage_and_start(&handle, &event).await;
    fly(&handle, 0, &STEADY).await;
    fly(&handle, 1, &QUICK).await;

    handle.set_crossing_flag(0, true).await.expect("flag");
    let held = handle.stop_race().await.expect("stop");
    assert_eq!(held.status, WinStatus::PendingCrossing);

    handle.set_crossing_flag(0, false).await.expect("flag");
    assert_eq!(handle.check_win().await.expect("check").status, WinStatus::Declared);
}

#[tokio::test]
async fn live_misuse_is_reported() {
    let (handle, event) = spawn(None);
    assert!(matches!(
        handle.record_crossing(0, 1_000, LapSource::Realtime).await,
        Err(RuntimeError::Race(RaceError::NotRacing))
    ));

    stage_and_start(&handle, &event).await;
    assert!(matches!(
        handle.record_crossing(2, 1_000, LapSource::Realtime).await,
        Err(RuntimeError::Race(RaceError::EmptySeat(2)))
    ));
    assert!(matches!(
        handle.delete_lap(0, 4).await,
        Err(RuntimeError::Race(RaceError::UnknownLap { node: 0, lap_number: 4 }))
    ));
    assert!(matches!(
        handle
            .stage_race(RaceSetup {
                heat_id: Some(999),
                ..RaceSetup::default()
            })
            .await,
        Err(RuntimeError::Store(_))
    ));

    handle.stage_race(RaceSetup::default()).await.expect("stage without heat");
    handle.start_race().await.expect("start");
    assert!(matches!(handle.save_race().await, Err(RuntimeError::NoHeat)));
}

#[tokio::test]
async fn live_lap_deletion_updates_results() {
    let (handle, event) = spawn(None);
    stage_and_start(&handle, &event).await;
    fly(&handle, 0, &STEADY).await;

    handle.delete_lap(0, 5).await.expect("delete");
    let live = handle.current_results().await.expect("results").expect("board");
    let ace = live
        .by_race_time
        .iter()
        .find(|row| row.pilot_id == event.pilots[0])
        .expect("ace");
    assert_eq!(ace.laps, 4);
}

#[tokio::test]
async fn saved_corrections_roll_up() {
    let (handle, event) = spawn(None);
    stage_and_start(&handle, &event).await;
    fly(&handle, 0, &STEADY).await;
    fly(&handle, 1, &QUICK).await;
    handle.stop_race().await.expect("stop");
    let race_id = handle.save_race().await.expect("save");

    let before = handle.results(Scope::Class(event.class)).await.expect("results").expect("class");
    assert_eq!(before.by_race_time[0].pilot_id, event.pilots[1]);

    let mut rx = handle.subscribe();
    handle
        .delete_saved_lap(race_id, event.pilots[1], 5)
        .await
        .expect("delete saved lap");
    let after = handle.results(Scope::Class(event.class)).await.expect("results").expect("class");
    assert_eq!(after.by_race_time[0].pilot_id, event.pilots[0]);

    let number = handle
        .add_saved_lap(race_id, event.pilots[1], 58_000)
        .await
        .expect("add saved lap");
    assert_eq!(number, 5);
    let restored = handle.results(Scope::Event).await.expect("results").expect("event");
    assert_eq!(restored.by_race_time[0].pilot_id, event.pilots[1]);

    let invalidated: Vec<Scope> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            RaceEvent::ResultsInvalidated { scopes } => Some(scopes),
            _ => None,
        })
        .flatten()
        .collect();
    for scope in [
        Scope::Race(race_id),
        Scope::Heat(event.heat),
        Scope::Class(event.class),
        Scope::Event,
    ] {
        assert!(invalidated.contains(&scope), "{scope} not invalidated");
    }

    handle.reassign_heat_class(event.heat, None).await.expect("unclass heat");
    assert!(handle.results(Scope::Class(event.class)).await.expect("results").is_none());
    let whole = handle.results(Scope::Event).await.expect("results").expect("event");
    assert_eq!(whole.by_race_time.len(), 2);
}

#[tokio::test]
async fn team_format_reports_team_results() {
    let (handle, event) = spawn(None);
    let patch = FormatPatch {
        team_mode: Some(TeamMode::Team),
        ..FormatPatch::default()
    };
    handle.alter_format(event.format, patch).await.expect("alter");
    stage_and_start(&handle, &event).await;
    fly(&handle, 0, &STEADY).await;
    fly(&handle, 1, &QUICK[..3]).await;

    let teams = handle.team_results().await.expect("teams").expect("team board");
    assert_eq!(teams.by_race_time[0].name, "Red");
    assert_eq!(teams.by_race_time[0].laps, 5);
    assert_eq!(teams.by_race_time[1].name, "Blue");
}

#[tokio::test]
async fn cache_entries_reach_sqlite() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("heatboard.db");
    let sink = SqliteCacheSink::open(&path).expect("open sqlite");
    let (handle, event) = spawn(Some(Box::new(sink)));

    stage_and_start(&handle, &event).await;
    fly(&handle, 0, &STEADY).await;
    handle.stop_race().await.expect("stop");
    handle.save_race().await.expect("save");
    handle.results(Scope::Event).await.expect("results").expect("event");

    let written = handle.flush().await.expect("flush");
    assert!(written > 0);
    handle.shutdown().await.expect("shutdown");

    let mut reopened = SqliteCacheSink::open(&path).expect("reopen");
    let loaded = reopened.load_entries().expect("load");
    assert!(loaded.iter().any(|(scope, entry)| {
        *scope == Scope::Event && entry.tokens().0.is_some() && entry.tokens().0 == entry.tokens().1
    }));

    // a second runtime starts warm from the same file
    let (warm, _) = spawn(Some(Box::new(reopened)));
    let whole = warm.results(Scope::Event).await.expect("results").expect("event");
    assert_eq!(whole.by_race_time[0].laps, 5);
    warm.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn full_persist_queue_defers_entries_until_flush() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("heatboard.db");
    let sink = SqliteCacheSink::open(&path).expect("open sqlite");
    let config = RuntimeConfig {
        persist_queue_bound: 1,
        batch_max_entries: 1,
        ..RuntimeConfig::default()
    };
    let (handle, event) = spawn_with(Some(Box::new(sink)), config);

    let mut built = Vec::new();
    for _ in 0..3 {
        stage_and_start(&handle, &event).await;
        fly(&handle, 0, &STEADY).await;
        fly(&handle, 1, &QUICK).await;
        handle.current_results().await.expect("results");
        handle.stop_race().await.expect("stop");
        built.push(Scope::Race(handle.save_race().await.expect("save")));
    }
    built.extend([Scope::Heat(event.heat), Scope::Class(event.class), Scope::Event]);
    for scope in &built {
        handle.results(*scope).await.expect("results").expect("board");
    }

    handle.flush().await.expect("flush");
    handle.shutdown().await.expect("shutdown");

    let loaded = SqliteCacheSink::open(&path).expect("reopen").load_entries().expect("load");
    for scope in built {
        let fresh = loaded.iter().any(|(stored, entry)| {
            *stored == scope && entry.tokens().0.is_some() && entry.tokens().0 == entry.tokens().1
        });
        assert!(fresh, "{scope:?} missing or stale after flush");
    }
}
