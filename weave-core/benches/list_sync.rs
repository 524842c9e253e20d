//! Benchmarks for list synchronization
//!
//! Run with: cargo bench --bench list_sync

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use weave_core::diff::{plan_keyed, plan_unkeyed, sync_keyed, sync_unkeyed};

/// Deterministic shuffle so runs are comparable.
fn scrambled(len: u32) -> Vec<u32> {
    let mut items: Vec<u32> = (0..len).collect();
    let mut state = 0x9E37_79B9u32;
    for i in (1..items.len()).rev() {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        items.swap(i, state as usize % (i + 1));
    }
    items
}

// =============================================================================
// PLANNING
// =============================================================================

fn bench_plan_keyed(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_keyed");
    for len in [10u32, 100, 1000] {
        let current: Vec<u32> = (0..len).collect();

        let mut swapped = current.clone();
        swapped.swap(1, (len - 2) as usize);
        group.bench_with_input(BenchmarkId::new("swap", len), &swapped, |b, target| {
            b.iter(|| black_box(plan_keyed(&current, target, |item| *item)))
        });

        let shuffled = scrambled(len);
        group.bench_with_input(BenchmarkId::new("shuffle", len), &shuffled, |b, target| {
            b.iter(|| black_box(plan_keyed(&current, target, |item| *item)))
        });
    }
    group.finish();
}

fn bench_plan_unkeyed(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_unkeyed");
    for len in [10u32, 100, 1000] {
        // Few distinct values, many duplicates.
        let current: Vec<u32> = (0..len).map(|i| i % 7).collect();
        let target: Vec<u32> = scrambled(len).into_iter().map(|i| i % 7).collect();
        group.bench_with_input(BenchmarkId::from_parameter(len), &target, |b, target| {
            b.iter(|| black_box(plan_unkeyed(&current, target)))
        });
    }
    group.finish();
}

// =============================================================================
// APPLYING
// =============================================================================

fn bench_sync_vec(c: &mut Criterion) {
    let current: Vec<u32> = (0..1000).collect();
    let mut target: Vec<u32> = (0..1000).filter(|i| i % 10 != 0).collect();
    target.extend(1000..1050);
    target.rotate_left(25);

    c.bench_function("sync_keyed_1000", |b| {
        b.iter(|| {
            let mut list = current.clone();
            black_box(sync_keyed(&mut list, &target, |item| *item))
        })
    });

    c.bench_function("sync_unkeyed_1000", |b| {
        b.iter(|| {
            let mut list = current.clone();
            black_box(sync_unkeyed(&mut list, &target))
        })
    });
}

criterion_group!(plan_benches, bench_plan_keyed, bench_plan_unkeyed);
criterion_group!(apply_benches, bench_sync_vec);
criterion_main!(plan_benches, apply_benches);
