//! Retention planning and due-ness benchmarks

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vault_core::{SnapshotId, Tier, TierName, TierSchedule};
use vault_journal::{due_tiers, plan_deletions, reconcile, BackupIndex};

/// Index holding `n` hourly runs spread across all five tiers
fn populated_index(n: usize) -> BackupIndex {
    let base = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let mut index = BackupIndex::new();
    for i in 0..n {
        let id = SnapshotId::from_datetime(base + Duration::hours(i as i64));
        index.append("hourly", id.clone()).unwrap();
        if i % 24 == 0 {
            index.append("daily", id.clone()).unwrap();
        }
        if i % (24 * 7) == 0 {
            index.append("weekly", id.clone()).unwrap();
        }
        if i % (24 * 30) == 0 {
            index.append("monthly", id.clone()).unwrap();
        }
        if i % (24 * 365) == 0 {
            index.append("yearly", id).unwrap();
        }
    }
    index
}

fn schedule() -> TierSchedule {
    TierSchedule::new(
        [
            Tier::with_default_interval(TierName::Hourly, 24),
            Tier::with_default_interval(TierName::Daily, 7),
            Tier::with_default_interval(TierName::Weekly, 4),
            Tier::with_default_interval(TierName::Monthly, 12),
            Tier::with_default_interval(TierName::Yearly, 0),
        ],
        Duration::minutes(5),
    )
    .unwrap()
}

fn bench_plan_deletions(c: &mut Criterion) {
    let schedule = schedule();
    let mut group = c.benchmark_group("plan_deletions");
    for n in [100usize, 1_000, 10_000] {
        let index = populated_index(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &index, |b, index| {
            b.iter(|| black_box(plan_deletions(index, &schedule)));
        });
    }
    group.finish();
}

fn bench_due_and_reconcile(c: &mut Criterion) {
    let schedule = schedule();
    let index = populated_index(10_000);
    let stored = index.referenced();
    let now = Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap();

    c.bench_function("due_tiers_10k", |b| {
        b.iter(|| black_box(due_tiers(&index, &schedule, now)));
    });

    c.bench_function("reconcile_10k", |b| {
        b.iter(|| black_box(reconcile(&index, &stored).is_ok()));
    });
}

criterion_group!(benches, bench_plan_deletions, bench_due_and_reconcile);
criterion_main!(benches);
