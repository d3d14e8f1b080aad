use std::sync::Arc;

use heatboard::{
    cache::{EntryStatus, ResultsCache, ResultsCacheEntry, SlotEntry, Token},
    config::ScoringConfig,
    core::{race::RaceState, source::StoreSource, store::RecordStore},
    lap::{LapSource, PilotRun, RaceFormat, append_lap},
    persist::{
        CacheSink, PersistError,
        sqlite::{EntryEnvelope, SqliteCacheSink},
    },
    types::{HeatId, RaceId, Scope},
};
use parking_lot::RwLock;
use rusqlite::{Connection, params};

fn seeded() -> (StoreSource, HeatId, RaceId) {
    let mut store = RecordStore::new();
    let (pilot, _) = store.add_pilot("ACE", "");
    let (heat, _) = store.add_heat(None, None).expect("heat");
    let mut laps = Vec::new();
    for ts in [1_000, 21_000, 40_500] {
        append_lap(&mut laps, pilot, 0, ts, LapSource::Realtime);
    }
    let run = PilotRun {
        pilot_id: pilot,
        node_index: 0,
        laps,
    };
    let (race, _) = store.save_race(heat, None, 0, vec![run]).expect("save");

    let source = StoreSource::new(
        Arc::new(RwLock::new(store)),
        Arc::new(RwLock::new(RaceState::new(2, RaceFormat::new("Open")))),
        3,
    );
    (source, heat, race)
}

fn sorted(mut entries: Vec<(Scope, SlotEntry)>) -> Vec<(Scope, SlotEntry)> {
    entries.sort_by_key(|(scope, entry)| (*scope, entry.slot().as_str()));
    entries
}

#[tokio::test]
async fn entries_survive_a_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");

    let (source, heat, _) = seeded();
    let cache = ResultsCache::new(Arc::new(source), ScoringConfig::default());
    let built = cache.results(Scope::Heat(heat)).await.expect("heat board");
    let exported = cache.export_entries();
    assert_eq!(exported.len(), 4);

    {
        let mut sink = SqliteCacheSink::open(&path).expect("open");
        assert_eq!(sink.store_entries(&exported).expect("store"), exported.len());
        // upserts replace rather than duplicate
        sink.store_entries(&exported).expect("store again");
        sink.flush().expect("flush");
    }

    let mut sink = SqliteCacheSink::open(&path).expect("reopen");
    assert_eq!(sink.len().expect("len"), exported.len());
    let loaded = sink.load_entries().expect("load");
    assert_eq!(sorted(loaded.clone()), sorted(exported));

    let (source, _, _) = seeded();
    let warm = ResultsCache::new(Arc::new(source), ScoringConfig::default());
    // ranking slots were never built and come back stale
    assert_eq!(warm.restore(loaded), 2);
    assert_eq!(warm.status(Scope::Heat(heat)), EntryStatus::Fresh);

    let restored = warm.results(Scope::Heat(heat)).await.expect("heat board");
    assert_eq!(restored, built);
}

#[tokio::test]
async fn damaged_entries_are_rebuilt_after_restore() {
    let mut sink = SqliteCacheSink::open_in_memory().expect("open");
    let (source, _, race) = seeded();

    let corrupt = ResultsCacheEntry {
        data_ver: Some(Token(5)),
        build_ver: Some(Token(9)),
        value: None,
    };
    sink.store_entry(Scope::Race(race), &SlotEntry::Results(corrupt))
        .expect("store");

    let cache = ResultsCache::new(Arc::new(source), ScoringConfig::default());
    let demoted = cache.restore(sink.load_entries().expect("load"));
    assert_eq!(demoted, 1);
    assert_eq!(cache.status(Scope::Race(race)), EntryStatus::Stale);

    let entry = cache.entry(Scope::Race(race)).expect("entry");
    assert!(entry.data_ver > Some(Token(9)));
    assert_eq!(entry.build_ver, None);

    let board = cache.results(Scope::Race(race)).await.expect("rebuilt");
    assert_eq!(board.by_race_time[0].laps, 2);
    assert_eq!(cache.status(Scope::Race(race)), EntryStatus::Fresh);
}

#[test]
fn unknown_payload_versions_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");

    let mut sink = SqliteCacheSink::open(&path).expect("open");
    sink.store_entry(Scope::Event, &SlotEntry::Results(ResultsCacheEntry::default()))
        .expect("store");

    let mut envelope = EntryEnvelope::new(SlotEntry::Results(ResultsCacheEntry::default()));
    envelope.format_version = 9;
    let payload = serde_json::to_vec(&envelope).expect("encode");
    let conn = Connection::open(&path).expect("raw open");
    conn.execute(
        "UPDATE cache_entries SET payload = ?1 WHERE scope = ?2",
        params![payload, Scope::Event.to_string()],
    )
    .expect("tamper");

    assert!(matches!(sink.load_entries(), Err(PersistError::Message(_))));
}

#[test]
fn clear_empties_the_table() {
    let mut sink = SqliteCacheSink::open_in_memory().expect("open");
    assert!(sink.is_empty().expect("empty"));
    sink.store_entry(Scope::Current, &SlotEntry::Results(ResultsCacheEntry::default()))
        .expect("store");
    sink.store_entry(Scope::Current, &SlotEntry::Ranking(ResultsCacheEntry::default()))
        .expect("store");
    assert_eq!(sink.len().expect("len"), 2);
    assert_eq!(sink.clear().expect("clear"), 2);
    assert!(sink.is_empty().expect("empty"));
}
