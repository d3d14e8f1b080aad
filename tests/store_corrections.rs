use std::sync::Arc;

use heatboard::{
    core::{race::RaceState, source::StoreSource, store::{RecordStore, StoreError}},
    engine::traits::{BuildPlan, ResultsSource},
    lap::{FormatPatch, LapSource, PilotRun, RaceFormat, append_lap},
    op::Op,
    types::{HeatId, NodeIndex, PilotId, Scope, TimeMs},
};
use parking_lot::RwLock;

fn run(pilot_id: PilotId, node: NodeIndex, stamps: &[TimeMs]) -> PilotRun {
    let mut laps = Vec::new();
    for ts in stamps {
        append_lap(&mut laps, pilot_id, node, *ts, LapSource::Realtime);
    }
    PilotRun {
        pilot_id,
        node_index: node,
        laps,
    }
}

#[test]
fn ids_are_shared_across_records() {
    let mut store = RecordStore::new();
    let (pilot, _) = store.add_pilot("ACE", "Red");
    let (format, _) = store.add_format(RaceFormat::new("Open"));
    let (class, _) = store.add_class("Open", Some(format)).expect("class");
    let (heat, _) = store.add_heat(None, Some(class)).expect("heat");
    assert_eq!((pilot, format, class, heat), (1, 2, 3, 4));
    assert_eq!(store.format(format).map(|f| f.id), Some(format));

    assert_eq!(store.add_class("Bad", Some(99)), Err(StoreError::UnknownFormat(99)));
    assert_eq!(store.add_heat(None, Some(99)), Err(StoreError::UnknownClass(99)));
}

#[test]
fn ops_are_sequenced_and_drained() {
    let mut store = RecordStore::new();
    let (_, first) = store.add_pilot("ACE", "");
    let (_, second) = store.add_pilot("BOLT", "");
    assert_eq!(first.seq, 1);
    assert_eq!(second.seq, 2);
    assert_eq!(store.latest_op_seq(), 2);

    let drained = store.drain_pending_ops();
    assert_eq!(drained, vec![first, second]);
    assert!(store.drain_pending_ops().is_empty());
}

#[test]
fn saved_races_take_rounds_and_class() {
    let mut store = RecordStore::new();
    let (pilot, _) = store.add_pilot("ACE", "");
    let (class, _) = store.add_class("Open", None).expect("class");
    let (heat, _) = store.add_heat(Some("Final".into()), Some(class)).expect("heat");

    let (r1, op) = store.save_race(heat, None, 0, vec![run(pilot, 0, &[1_000, 21_000])]).expect("save");
    assert_eq!(
        op.op,
        Op::RaceSaved {
            race_id: r1,
            heat_id: heat,
            class_id: Some(class),
        }
    );
    let (r2, _) = store.save_race(heat, None, 0, vec![run(pilot, 0, &[1_000, 22_000])]).expect("save");

    assert_eq!(store.race(r1).map(|r| r.round_id), Some(1));
    assert_eq!(store.race(r2).map(|r| r.round_id), Some(2));
    assert_eq!(store.race(r2).and_then(|r| r.class_id), Some(class));
    assert_eq!(store.races_by_heat(heat).len(), 2);
    assert_eq!(store.races_with_pilot(pilot), vec![r1, r2]);

    assert_eq!(
        store.save_race(heat, None, 0, vec![run(77, 0, &[1_000])]),
        Err(StoreError::UnknownPilot(77))
    );
    assert_eq!(store.save_race(99, None, 0, Vec::new()), Err(StoreError::UnknownHeat(99)));
}

#[test]
fn deleting_a_saved_lap_resequences_the_run() {
    let mut store = RecordStore::new();
    let (pilot, _) = store.add_pilot("ACE", "");
    let (heat, _) = store.add_heat(None, None).expect("heat");
    let (race, _) = store
        .save_race(heat, None, 0, vec![run(pilot, 0, &[1_000, 5_000, 21_000, 41_000])])
        .expect("save");

    let (_, op) = store.delete_lap(race, pilot, 1).expect("delete");
    assert_eq!(op.op.touched_scopes(&store), vec![Scope::Race(race)]);

    let laps = &store.race(race).and_then(|r| r.run(pilot)).expect("run").laps;
    let active: Vec<(u32, TimeMs)> = laps
        .iter()
        .filter(|lap| !lap.deleted)
        .map(|lap| (lap.lap_number, lap.lap_time_ms))
        .collect();
    assert_eq!(active, vec![(0, 1_000), (1, 20_000), (2, 20_000)]);

    assert_eq!(
        store.delete_lap(race, pilot, 9),
        Err(StoreError::UnknownLap {
            race_id: race,
            pilot_id: pilot,
            lap_number: 9,
        })
    );

    let (number, _) = store.add_saved_lap(race, pilot, 60_000, LapSource::Manual).expect("add");
    assert_eq!(number, 3);
}

#[test]
fn reassigning_a_race_touches_both_parents() {
    let mut store = RecordStore::new();
    let (pilot, _) = store.add_pilot("ACE", "");
    let (open, _) = store.add_class("Open", None).expect("class");
    let (stock, _) = store.add_class("Stock", None).expect("class");
    let (from, _) = store.add_heat(None, Some(open)).expect("heat");
    let (to, _) = store.add_heat(None, Some(stock)).expect("heat");
    let (kept, _) = store.save_race(to, None, 0, vec![run(pilot, 0, &[1_000])]).expect("save");
    let (moved, _) = store.save_race(from, None, 0, vec![run(pilot, 0, &[1_000])]).expect("save");

    let (_, op) = store.reassign_race(moved, to).expect("reassign");
    let race = store.race(moved).expect("race");
    assert_eq!(race.heat_id, to);
    assert_eq!(race.class_id, Some(stock));
    assert_eq!(race.round_id, 2);
    assert_eq!(store.race(kept).map(|r| r.round_id), Some(1));
    assert!(store.races_by_heat(from).is_empty());

    assert_eq!(
        op.op.touched_scopes(&store),
        vec![
            Scope::Race(moved),
            Scope::Heat(from),
            Scope::Heat(to),
            Scope::Class(open),
            Scope::Class(stock),
            Scope::Event,
        ]
    );
}

#[test]
fn rounds_never_repeat_within_a_heat() {
    let mut store = RecordStore::new();
    let (pilot, _) = store.add_pilot("ACE", "");
    let (a, _) = store.add_heat(None, None).expect("heat");
    let (b, _) = store.add_heat(None, None).expect("heat");
    let save = |store: &mut RecordStore, heat: HeatId| {
        store.save_race(heat, None, 0, vec![run(pilot, 0, &[1_000])]).expect("save").0
    };
    let rounds = |store: &RecordStore, heat: HeatId| {
        store.races_by_heat(heat).iter().map(|r| r.round_id).collect::<Vec<_>>()
    };

    let _r1 = save(&mut store, a);
    let r2 = save(&mut store, a);
    let _r3 = save(&mut store, a);
    let b1 = save(&mut store, b);
    let _b2 = save(&mut store, b);

    store.reassign_race(r2, b).expect("reassign");
    assert_eq!(rounds(&store, b), vec![1, 2, 3]);
    let _r4 = save(&mut store, a);
    assert_eq!(rounds(&store, a), vec![1, 3, 4]);

    store.reassign_race(b1, a).expect("reassign");
    assert_eq!(rounds(&store, a), vec![1, 3, 4, 5]);
    let _b4 = save(&mut store, b);
    assert_eq!(rounds(&store, b), vec![2, 3, 4]);
}

#[test]
fn moving_a_heat_carries_its_races() {
    let mut store = RecordStore::new();
    let (pilot, _) = store.add_pilot("ACE", "");
    let (class, _) = store.add_class("Open", None).expect("class");
    let (heat, _) = store.add_heat(None, None).expect("heat");
    let (race, _) = store.save_race(heat, None, 0, vec![run(pilot, 0, &[1_000])]).expect("save");

    let (_, op) = store.reassign_heat_class(heat, Some(class)).expect("move");
    assert_eq!(store.race(race).and_then(|r| r.class_id), Some(class));
    assert_eq!(store.heats_by_class(class).len(), 1);
    assert!(store.unclassified_heats().is_empty());
    assert_eq!(
        op.op.touched_scopes(&store),
        vec![Scope::Heat(heat), Scope::Class(class), Scope::Event]
    );
}

#[test]
fn record_edits_touch_only_what_scores_read() {
    let mut store = RecordStore::new();
    let (pilot, _) = store.add_pilot("ACE", "Red");
    let (format, _) = store.add_format(RaceFormat::new("Open"));
    let (heat, _) = store.add_heat(None, None).expect("heat");
    let (race, _) = store
        .save_race(heat, Some(format), 0, vec![run(pilot, 0, &[1_000])])
        .expect("save");

    let (_, same) = store.alter_pilot(pilot, "ACE", "Red").expect("alter");
    assert!(same.op.touched_scopes(&store).is_empty());
    let (_, renamed) = store.alter_pilot(pilot, "ACE2", "Red").expect("alter");
    assert_eq!(renamed.op.touched_scopes(&store), vec![Scope::Current, Scope::Race(race)]);

    let cosmetic = FormatPatch {
        name: Some("Open Final".into()),
        ..FormatPatch::default()
    };
    let (_, op) = store.alter_format(format, cosmetic).expect("alter");
    assert!(op.op.touched_scopes(&store).is_empty());

    let longer = FormatPatch {
        race_time_ms: Some(Some(180_000)),
        ..FormatPatch::default()
    };
    let (_, op) = store.alter_format(format, longer).expect("alter");
    assert_eq!(op.op.touched_scopes(&store), vec![Scope::Current, Scope::Race(race)]);
    assert_eq!(store.format(format).and_then(|f| f.race_time_ms), Some(180_000));
}

#[test]
fn source_plans_follow_the_hierarchy() {
    let mut store = RecordStore::new();
    let (pilot, _) = store.add_pilot("ACE", "");
    let (class, _) = store.add_class("Open", None).expect("class");
    let (empty_class, _) = store.add_class("Empty", None).expect("class");
    let (classed, _) = store.add_heat(None, Some(class)).expect("heat");
    let (loose, _) = store.add_heat(None, None).expect("heat");
    let (idle, _) = store.add_heat(None, None).expect("heat");
    let (r1, _) = store.save_race(classed, None, 0, vec![run(pilot, 0, &[1_000])]).expect("save");
    let (r2, _) = store.save_race(loose, None, 0, vec![run(pilot, 0, &[1_000])]).expect("save");

    let race = RaceState::new(4, RaceFormat::new("Open"));
    let source = StoreSource::new(Arc::new(RwLock::new(store)), Arc::new(RwLock::new(race)), 3);

    assert_eq!(source.plan(Scope::Current), BuildPlan::NoData);
    assert_eq!(source.plan(Scope::Race(r1)), BuildPlan::Rank);
    assert_eq!(source.plan(Scope::Race(999)), BuildPlan::NoData);
    assert_eq!(source.plan(Scope::Heat(classed)), BuildPlan::Merge(vec![Scope::Race(r1)]));
    assert_eq!(source.plan(Scope::Heat(idle)), BuildPlan::NoData);
    assert_eq!(source.plan(Scope::Class(class)), BuildPlan::Merge(vec![Scope::Heat(classed)]));
    assert_eq!(source.plan(Scope::Class(empty_class)), BuildPlan::NoData);
    assert_eq!(
        source.plan(Scope::Event),
        BuildPlan::Merge(vec![Scope::Class(class), Scope::Heat(loose)])
    );

    assert_eq!(source.parents(Scope::Race(r2)), vec![Scope::Heat(loose)]);
    assert_eq!(source.parents(Scope::Heat(loose)), vec![Scope::Event]);
    assert_eq!(source.parents(Scope::Heat(classed)), vec![Scope::Class(class)]);
    assert_eq!(source.parents(Scope::Class(class)), vec![Scope::Event]);
    assert!(source.parents(Scope::Current).is_empty());

    let board = source.rank(Scope::Race(r1), None).expect("race board");
    assert_eq!(board.by_race_time[0].callsign, "ACE");
    assert!(source.rank(Scope::Heat(classed), None).is_none());
}

#[test]
fn race_boards_attribute_heat_and_round() {
    let mut store = RecordStore::new();
    let (pilot, _) = store.add_pilot("ACE", "");
    let (heat, _) = store.add_heat(Some("Qualifier".into()), None).expect("heat");
    store.save_race(heat, None, 0, vec![run(pilot, 0, &[1_000, 21_000])]).expect("save");
    let (second, _) = store
        .save_race(heat, None, 0, vec![run(pilot, 0, &[1_000, 21_000, 40_000])])
        .expect("save");

    let source = StoreSource::new(
        Arc::new(RwLock::new(store)),
        Arc::new(RwLock::new(RaceState::new(2, RaceFormat::new("Open")))),
        3,
    );
    let board = source.rank(Scope::Race(second), None).expect("board");
    let row = &board.by_race_time[0];
    let fastest = row.fastest_lap_source.as_ref().expect("attribution");
    assert_eq!(fastest.label, "Qualifier / Round 2");
    assert_eq!(fastest.race_id, Some(second));
    assert_eq!(fastest.round_id, Some(2));
    assert_eq!(row.consecutives_source.as_ref().map(|s| s.heat_id), Some(Some(heat)));
}
