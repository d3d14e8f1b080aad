use heatboard::{
    engine::{
        gap::gap_info,
        ranking::{PilotInput, RankingInput, RunInput, build_leaderboard, meta_for_format},
    },
    lap::{Lap, LapSource, Pilot, RaceFormat, append_lap, delete_lap},
    leaderboard::Leaderboard,
    types::{NodeIndex, PilotId, PrimaryLeaderboard, StartBehavior, TimeMs, WinCondition},
};

fn laps_at(pilot_id: PilotId, node: NodeIndex, stamps: &[TimeMs]) -> Vec<Lap> {
    let mut laps = Vec::new();
    for ts in stamps {
        append_lap(&mut laps, pilot_id, node, *ts, LapSource::Realtime);
    }
    laps
}

fn entrant(id: PilotId, format: &RaceFormat, laps: Vec<Lap>) -> PilotInput {
    PilotInput {
        pilot: Pilot {
            id,
            callsign: format!("P{id}"),
            team: String::new(),
        },
        node: laps.first().map(|lap| lap.node_index),
        runs: vec![RunInput {
            laps,
            start_behavior: format.start_behavior,
            source: None,
        }],
    }
}

fn board(format: &RaceFormat, pilots: Vec<PilotInput>, live: bool) -> Leaderboard {
    let input = RankingInput {
        pilots,
        meta: meta_for_format(Some(format), 3),
        live,
    };
    build_leaderboard(&input, None)
}

fn ids(rows: &[heatboard::leaderboard::Row]) -> Vec<(PilotId, u32)> {
    rows.iter().map(|row| (row.pilot_id, row.position)).collect()
}

#[test]
fn holeshot_is_not_counted_but_first_lap_is() {
    let mut format = RaceFormat::new("Open");
    let lb = board(&format, vec![entrant(1, &format, laps_at(1, 0, &[1_200, 21_000, 40_500]))], false);
    let row = &lb.by_race_time[0];
    assert_eq!(row.laps, 2);
    assert_eq!(row.starts, 1);
    assert_eq!(row.total_time_raw, 40_500);
    assert_eq!(row.total_time_laps_raw, 39_300);
    assert_eq!(row.fastest_lap_raw, 19_500);
    assert_eq!(row.average_lap_raw, 19_650);

    format.start_behavior = StartBehavior::FirstLap;
    let lb = board(&format, vec![entrant(1, &format, laps_at(1, 0, &[1_200, 21_000, 40_500]))], false);
    let row = &lb.by_race_time[0];
    assert_eq!(row.laps, 3);
    assert_eq!(row.fastest_lap_raw, 1_200);
}

#[test]
fn equal_rows_share_a_position() {
    let format = RaceFormat::new("Open");
    let lb = board(
        &format,
        vec![
            entrant(1, &format, laps_at(1, 0, &[1_000, 21_000, 41_000])),
            entrant(2, &format, laps_at(2, 1, &[1_000, 21_000, 41_000])),
            entrant(3, &format, laps_at(3, 2, &[1_000, 22_000])),
        ],
        false,
    );
    assert_eq!(ids(&lb.by_race_time), vec![(1, 1), (2, 1), (3, 3)]);
    // equal fastest laps share, the next distinct row skips ahead
    assert_eq!(lb.by_fastest_lap[0].position, 1);
    assert_eq!(lb.by_fastest_lap[1].position, 1);
    assert_eq!(lb.by_fastest_lap[2].position, 3);
}

#[test]
fn pilots_without_laps_sort_last() {
    let format = RaceFormat::new("Open");
    let lb = board(
        &format,
        vec![
            entrant(1, &format, Vec::new()),
            entrant(2, &format, laps_at(2, 1, &[1_000, 21_000])),
        ],
        false,
    );
    assert_eq!(lb.by_race_time[0].pilot_id, 2);
    assert_eq!(lb.by_fastest_lap[0].pilot_id, 2);
    assert_eq!(lb.by_consecutives[0].pilot_id, 2);
    assert_eq!(lb.by_race_time[1].laps, 0);
    assert_eq!(lb.by_race_time[1].starts, 0);
}

#[test]
fn short_runs_fall_back_to_partial_windows() {
    let format = RaceFormat::new("Open");
    let lb = board(
        &format,
        vec![
            entrant(1, &format, laps_at(1, 0, &[1_000, 21_000, 42_000])),
            entrant(2, &format, laps_at(2, 1, &[1_000, 31_000, 61_000, 91_000])),
        ],
        false,
    );
    let full = &lb.by_consecutives[0];
    assert_eq!(full.pilot_id, 2);
    assert_eq!(full.consecutives_base, 3);
    assert_eq!(full.consecutives_raw, 90_000);
    assert_eq!(full.consecutives_lap_start, Some(1));

    let partial = &lb.by_consecutives[1];
    assert_eq!(partial.consecutives_base, 2);
    assert_eq!(partial.consecutives_raw, 41_000);
    assert_eq!(partial.position, 2);
}

#[test]
fn format_window_size_overrides_default() {
    let mut format = RaceFormat::new("Open");
    format.consecutives_count = Some(2);
    let lb = board(
        &format,
        vec![entrant(1, &format, laps_at(1, 0, &[1_000, 31_000, 51_000, 70_000]))],
        false,
    );
    assert_eq!(lb.meta.consecutives_count, 2);
    assert_eq!(lb.by_consecutives[0].consecutives_raw, 39_000);
    assert_eq!(lb.by_consecutives[0].consecutives_lap_start, Some(2));
}

#[test]
fn staggered_orders_by_lap_time_only() {
    let mut format = RaceFormat::new("Open");
    let pilots = |format: &RaceFormat| {
        vec![
            entrant(1, format, laps_at(1, 0, &[10_000, 30_000, 50_000])),
            entrant(2, format, laps_at(2, 1, &[1_000, 21_500, 42_000])),
        ]
    };

    let lb = board(&format, pilots(&format), false);
    assert_eq!(lb.by_race_time[0].pilot_id, 2);

    format.start_behavior = StartBehavior::Staggered;
    let lb = board(&format, pilots(&format), false);
    assert_eq!(lb.meta.start_behavior, Some(StartBehavior::Staggered));
    assert_eq!(lb.by_race_time[0].pilot_id, 1);
    assert_eq!(lb.by_race_time[0].total_time_laps_raw, 40_000);
}

#[test]
fn deleted_laps_are_ignored() {
    let format = RaceFormat::new("Open");
    let mut laps = laps_at(1, 0, &[1_000, 5_000, 21_000, 41_000]);
    assert!(delete_lap(&mut laps, 1));
    let lb = board(&format, vec![entrant(1, &format, laps)], false);
    let row = &lb.by_race_time[0];
    assert_eq!(row.laps, 2);
    assert_eq!(row.fastest_lap_raw, 20_000);
    assert_eq!(row.total_time_raw, 41_000);
}

#[test]
fn ranking_is_idempotent() {
    let format = RaceFormat::new("Open");
    let pilots = vec![
        entrant(1, &format, laps_at(1, 0, &[1_000, 21_000, 41_000])),
        entrant(2, &format, laps_at(2, 1, &[1_500, 20_000, 43_000])),
    ];
    let first = board(&format, pilots.clone(), true);
    let second = board(&format, pilots, true);
    assert_eq!(first, second);
}

#[test]
fn fastest_race_lap_follows_the_field() {
    let format = RaceFormat::new("Open");
    let input = RankingInput {
        pilots: vec![
            entrant(1, &format, laps_at(1, 0, &[1_000, 21_000])),
            entrant(2, &format, laps_at(2, 1, &[1_000, 22_000])),
        ],
        meta: meta_for_format(Some(&format), 3),
        live: true,
    };
    let first = build_leaderboard(&input, None);
    let fastest = first.meta.fastest_race_lap_data.clone().expect("fastest lap");
    assert_eq!(fastest.pilot_id, 1);
    assert_eq!(fastest.time_raw, 20_000);
    assert_eq!(fastest.text, "0:20.000");

    let again = build_leaderboard(&input, Some(&first));
    assert_eq!(again.meta.fastest_race_lap_data, Some(fastest));
}

#[test]
fn live_rows_carry_last_lap_and_time_behind() {
    let format = RaceFormat::new("Open");
    let lb = board(
        &format,
        vec![
            entrant(1, &format, laps_at(1, 0, &[1_000, 21_000])),
            entrant(2, &format, laps_at(2, 1, &[1_500, 22_000])),
        ],
        true,
    );
    let leader = &lb.by_race_time[0];
    let chaser = &lb.by_race_time[1];
    assert_eq!(leader.pilot_id, 1);
    assert_eq!(leader.last_lap_raw, Some(20_000));
    assert_eq!(leader.time_behind_raw, None);
    assert_eq!(chaser.time_behind_raw, Some(1_000));

    let saved = board(
        &format,
        vec![entrant(1, &format, laps_at(1, 0, &[1_000, 21_000]))],
        false,
    );
    assert_eq!(saved.by_race_time[0].last_lap_raw, None);
}

#[test]
fn primary_view_tracks_win_condition() {
    let mut format = RaceFormat::new("Open");
    format.win_condition = WinCondition::FastestLap;
    let lb = board(&format, vec![entrant(1, &format, laps_at(1, 0, &[1_000, 21_000]))], false);
    assert_eq!(lb.meta.primary_leaderboard, PrimaryLeaderboard::ByFastestLap);
    assert_eq!(lb.primary(), lb.by_fastest_lap.as_slice());
}

#[test]
fn gap_reports_splits_to_the_pilots_ahead() {
    let format = RaceFormat::new("Open");
    let lb = board(
        &format,
        vec![
            entrant(1, &format, laps_at(1, 0, &[1_000, 21_000, 41_000])),
            entrant(2, &format, laps_at(2, 1, &[1_500, 22_000, 43_000])),
            entrant(3, &format, laps_at(3, 2, &[2_000, 23_000])),
        ],
        true,
    );

    let leader = gap_info(&lb, 0).expect("leader");
    assert_eq!(leader.current.position, 1);
    assert!(leader.next_rank.is_none());
    assert!(leader.first_rank.is_none());

    let second = gap_info(&lb, 1).expect("second");
    let ahead = second.next_rank.expect("next rank");
    assert_eq!(ahead.node, Some(0));
    assert_eq!(ahead.split_ms, 2_000);
    assert!(second.first_rank.is_none());

    let third = gap_info(&lb, 2).expect("third");
    assert_eq!(third.current.lap_number, Some(1));
    assert_eq!(third.current.last_lap_ms, Some(21_000));
    assert_eq!(third.next_rank.expect("next").split_ms, -20_000);
    assert_eq!(third.first_rank.expect("first").split_ms, -18_000);

    assert!(gap_info(&lb, 7).is_none());
}

#[test]
fn fastest_lap_gap_uses_last_lap() {
    let mut format = RaceFormat::new("Open");
    format.win_condition = WinCondition::FastestLap;
    let lb = board(
        &format,
        vec![
            entrant(1, &format, laps_at(1, 0, &[1_000, 19_000, 40_000])),
            entrant(2, &format, laps_at(2, 1, &[1_000, 20_000, 42_000])),
        ],
        true,
    );

    let leader = gap_info(&lb, 0).expect("leader");
    assert_eq!(leader.next_rank.expect("own best").split_ms, 3_000);
    assert!(!leader.current.is_best_lap);

    let chaser = gap_info(&lb, 1).expect("chaser");
    assert_eq!(chaser.next_rank.expect("next").split_ms, 22_000 - 18_000);
}
