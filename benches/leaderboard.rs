use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use heatboard::{
    engine::{
        merge::merge_leaderboards,
        ranking::{PilotInput, RankingInput, RunInput, build_leaderboard, meta_for_format},
    },
    lap::{LapSource, Pilot, RaceFormat, append_lap},
    leaderboard::Leaderboard,
    types::{PilotId, TimeMs},
};

fn race_input(pilots: u32, laps: u32, offset: TimeMs) -> RankingInput {
    let format = RaceFormat::new("Open");
    let pilots = (0..pilots)
        .map(|i| {
            let id: PilotId = i + 1;
            let mut run = Vec::new();
            let mut clock = 1_000 + offset;
            for lap in 0..=laps {
                clock += 18_000 + TimeMs::from((i * 37 + lap * 101) % 4_000);
                append_lap(&mut run, id, i as usize, clock, LapSource::Realtime);
            }
            PilotInput {
                pilot: Pilot {
                    id,
                    callsign: format!("P{id}"),
                    team: String::new(),
                },
                node: Some(i as usize),
                runs: vec![RunInput {
                    laps: run,
                    start_behavior: format.start_behavior,
                    source: None,
                }],
            }
        })
        .collect();
    RankingInput {
        pilots,
        meta: meta_for_format(Some(&format), 3),
        live: true,
    }
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_leaderboard");
    for pilots in [8u32, 32, 128] {
        let input = race_input(pilots, 12, 0);
        group.bench_with_input(BenchmarkId::from_parameter(pilots), &input, |b, input| {
            b.iter(|| build_leaderboard(input, None));
        });
    }
    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let races: Vec<Leaderboard> = (0..64)
        .map(|n| build_leaderboard(&race_input(8, 6, TimeMs::from(n) * 250), None))
        .collect();
    let children: Vec<&Leaderboard> = races.iter().collect();

    c.bench_function("merge_64_races", |b| {
        b.iter(|| merge_leaderboards(&children, 3, None));
    });
}

criterion_group!(benches, bench_build, bench_merge);
criterion_main!(benches);
