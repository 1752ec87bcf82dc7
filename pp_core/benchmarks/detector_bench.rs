use chrono::{DateTime, Duration, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pp_core::{detect_snipes, stamp_cycle_start, SnipeThresholds};
use pp_schema::{ConflictProgress, ControlState, PowerplayRecord, SystemState, Tier, KNOWN_POWERS};

fn controlled(date: DateTime<Utc>, tier: Tier, progress: f64, r: u64, u: u64) -> PowerplayRecord {
    PowerplayRecord {
        name: "Bench".into(),
        id64: 1,
        date,
        powers: None,
        population: Some(1_000_000),
        state: SystemState::Controlled(ControlState {
            power: Some("Edmund Mahon".into()),
            tier,
            progress: Some(progress),
            reinforcement: Some(r),
            undermining: Some(u),
        }),
        cycle_start: None,
        last_cycle_start: None,
    }
}

fn contested(date: DateTime<Utc>, powers: usize, progress: f64) -> PowerplayRecord {
    PowerplayRecord {
        state: SystemState::Contested(
            KNOWN_POWERS
                .iter()
                .take(powers)
                .map(|power| ConflictProgress {
                    power: power.to_string(),
                    progress,
                })
                .collect(),
        ),
        ..controlled(date, Tier::Exploited, 0.0, 0, 0)
    }
}

fn bench_detector(c: &mut Criterion) {
    let tick: DateTime<Utc> = "2026-02-12T07:05:00Z".parse().expect("tick");
    let thresholds = SnipeThresholds::default();
    let mut group = c.benchmark_group("detect_snipes");

    let before = controlled(tick - Duration::hours(3), Tier::Fortified, 0.6, 0, 0);
    let mut after = controlled(tick + Duration::hours(1), Tier::Exploited, 0.7, 0, 0);
    stamp_cycle_start(Some(&before), &mut after, tick);
    group.bench_function("cross_cycle_drop", |b| {
        b.iter(|| detect_snipes(Some(&before), &after, tick, &thresholds))
    });

    let mut steady = controlled(tick + Duration::hours(2), Tier::Stronghold, 0.5, 1_000, 1_000);
    stamp_cycle_start(None, &mut steady, tick);
    let mut next = controlled(tick + Duration::hours(3), Tier::Stronghold, 0.52, 12_000, 4_000);
    stamp_cycle_start(Some(&steady), &mut next, tick);
    group.bench_function("same_cycle_quiet", |b| {
        b.iter(|| detect_snipes(Some(&steady), &next, tick, &thresholds))
    });

    for powers in [1usize, 4, 12] {
        let previous = contested(tick + Duration::hours(1), powers, 0.2);
        let current = contested(tick + Duration::hours(2), powers, 0.9);
        group.bench_with_input(
            BenchmarkId::new("acquisition", powers),
            &powers,
            |b, _| b.iter(|| detect_snipes(Some(&previous), &current, tick, &thresholds)),
        );
    }

    group.finish();
}

criterion_group!(detector_benches, bench_detector);
criterion_main!(detector_benches);
