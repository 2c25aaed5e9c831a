//! # Checkpoint Lookup Benchmarks
//!
//! Claims to validate:
//! - Historical lookup: O(log n) in the number of checkpoints
//! - Exact hint: O(1) regardless of history length
//! - Snapshot read: lock-free, independent of concurrent writers
//!
//! Conditions:
//! - Traces up to 1M checkpoints
//! - Random historical timestamps (cache-unfriendly)
//! - Appends racing readers

use criterion::{black_box, BenchmarkId, Criterion, Throughput};
use primitive_types::U256;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use settlement_sync::{CheckpointStore, Trace};

/// Trace with one checkpoint every 12 seconds.
fn build_trace(len: u64) -> Trace<U256> {
    let mut trace = Trace::new();
    for i in 0..len {
        // push only fails on out-of-order timestamps
        let _ = trace.push(i * 12, U256::from(i));
    }
    trace
}

fn build_store(keys: u8, len: u64) -> CheckpointStore<u8, U256> {
    let store = CheckpointStore::new();
    let _ = store.record_batch(
        (0..keys).flat_map(|k| (0..len).map(move |i| (k, i * 12, U256::from(i)))),
    );
    store
}

pub fn register_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("settlement/checkpoint");
    group.measurement_time(Duration::from_secs(5));

    for len in [1_000u64, 100_000, 1_000_000] {
        let trace = build_trace(len);
        let span = len * 12;

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("upper_lookup_random", len),
            &trace,
            |b, trace| {
                let mut rng = rand::thread_rng();
                b.iter(|| {
                    let at = rng.gen_range(0..span);
                    black_box(trace.upper_lookup(black_box(at), None))
                })
            },
        );

        // caller remembers the index of the previous lookup
        group.bench_with_input(
            BenchmarkId::new("upper_lookup_hinted", len),
            &trace,
            |b, trace| {
                let at = span / 2 + 5;
                let hint = trace.lookup_index(at, None).ok();
                b.iter(|| black_box(trace.upper_lookup(black_box(at), hint)))
            },
        );
    }

    let store = build_store(64, 10_000);
    group.bench_function("store_query_64_keys", |b| {
        let mut rng = rand::thread_rng();
        b.iter(|| {
            let key: u8 = rng.gen_range(0..64);
            let at = rng.gen_range(0..120_000u64);
            black_box(store.query(&key, at, None))
        })
    });

    group.bench_function("snapshot_multi_key_read", |b| {
        b.iter(|| {
            let snapshot = store.snapshot();
            let mut total = U256::zero();
            for key in 0..64u8 {
                if let Ok(v) = snapshot.query(&key, 60_000, None) {
                    total = total.saturating_add(v);
                }
            }
            black_box(total)
        })
    });

    group.bench_function("append_under_readers", |b| {
        let store = Arc::new(build_store(8, 1_000));
        let reader = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..200_000u64 {
                    black_box(store.query(&((i % 8) as u8), i % 12_000, None).ok());
                }
            })
        };
        let mut at = 12_000u64;
        b.iter(|| {
            at += 12;
            black_box(store.record(0, at, U256::from(at)))
        });
        let _ = reader.join();
    });

    group.finish();
}
