//! Segment acquire/sync throughput benchmark.
//!
//! Measures how `Segment::acquire` scales with write volume and how long
//! `Segment::sync` takes to freeze and serialize a populated segment.
//!
//! Run: cargo bench --bench segment_sync

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use concourse_kernel::indexer::SearchIndexer;
use concourse_kernel::model::{Identifier, Text, Value};
use concourse_kernel::revision::Action;
use concourse_kernel::segment::{Segment, Write};

fn writes(count: usize) -> Vec<Write> {
    (0..count)
        .map(|i| {
            Write::new(
                Action::Add,
                Identifier::new(i as i64),
                Text::new("name"),
                Value::String(Text::new(&format!("user_{i}"))),
                i as u64,
            )
        })
        .collect()
}

fn new_segment(expected: u64) -> Segment {
    let indexer = Arc::new(SearchIndexer::new(3));
    Segment::new(0, expected, indexer, 0)
}

fn bench_acquire(c: &mut Criterion) {
    let mut group = c.benchmark_group("acquire");
    for &count in &[100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || (new_segment(count as u64), writes(count)),
                |(segment, batch)| {
                    for w in &batch {
                        segment.acquire(black_box(w)).unwrap();
                    }
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync");
    for &count in &[100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let segment = new_segment(count as u64);
                    for w in writes(count) {
                        segment.acquire(&w).unwrap();
                    }
                    segment
                },
                |segment| {
                    black_box(segment.sync().unwrap());
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_acquire, bench_sync);
criterion_main!(benches);
