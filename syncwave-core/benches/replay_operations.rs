use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::sync::Arc;
use syncwave_core::config::ReplayConfig;
use syncwave_core::crdt::{CrdtState, CrdtStateManager, LastWriteWinsMerge, VectorClock};
use syncwave_core::event_store::EventStore;
use syncwave_core::replay::{OptimizedReplayManager, SnapshotManager};
use syncwave_core::test_utils::{counter_reducer, memory_store, seed_events};

fn replay_manager(store: Arc<EventStore>) -> Arc<SnapshotManager> {
    Arc::new(SnapshotManager::new(store, counter_reducer(), ReplayConfig::default()))
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_store_append");

    for batch_size in [10u64, 100, 1_000].iter() {
        group.throughput(Throughput::Elements(*batch_size));
        group.bench_with_input(BenchmarkId::new("append_next", batch_size), batch_size, |b, &n| {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            b.to_async(&runtime).iter(|| async move {
                let (_, store) = memory_store(0);
                for _ in 0..n {
                    store
                        .append_next("bench-actor", "increment", json!({ "by": 1 }))
                        .await
                        .unwrap();
                }
                black_box(store)
            });
        });
    }

    group.finish();
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");

    for history in [100u64, 1_000, 5_000].iter() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let manager = runtime.block_on(async {
            let (_, store) = memory_store(0);
            seed_events(&store, "bench-actor", *history).await;
            let manager = replay_manager(store);
            // Leave a short tail after the last snapshot.
            manager
                .create_snapshot_at("bench-actor", history - history / 10)
                .await
                .unwrap();
            manager
        });

        group.throughput(Throughput::Elements(*history));
        group.bench_with_input(BenchmarkId::new("full", history), history, |b, _| {
            b.to_async(&runtime).iter(|| {
                let manager = manager.clone();
                async move { black_box(manager.replay_all("bench-actor").await.unwrap()) }
            });
        });
        group.bench_with_input(BenchmarkId::new("from_snapshot", history), history, |b, _| {
            b.to_async(&runtime).iter(|| {
                let manager = manager.clone();
                async move {
                    black_box(manager.replay_from_latest_snapshot("bench-actor").await.unwrap())
                }
            });
        });
    }

    group.finish();
}

fn bench_incremental_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("incremental_sync");
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let replay = runtime.block_on(async {
        let (_, store) = memory_store(0);
        seed_events(&store, "bench-actor", 2_000).await;
        Arc::new(OptimizedReplayManager::new(replay_manager(store)))
    });

    for page in [10usize, 100, 500].iter() {
        group.throughput(Throughput::Elements(*page as u64));
        group.bench_with_input(BenchmarkId::new("page", page), page, |b, &page| {
            b.to_async(&runtime).iter(|| {
                let replay = replay.clone();
                async move {
                    black_box(replay.incremental_sync("bench-actor", 1_000, page).await.unwrap())
                }
            });
        });
    }

    group.finish();
}

fn bench_crdt_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("crdt_merge");
    let manager = CrdtStateManager::with_default_merge(Arc::new(LastWriteWinsMerge));

    for fields in [10usize, 100, 1_000].iter() {
        let mut local = CrdtState::new("doc", json!({}));
        let mut remote = CrdtState::new("doc", json!({}));
        for i in 0..*fields {
            let field = format!("field_{i}");
            LastWriteWinsMerge::write(&mut local.data, &field, json!(i), i as u64);
            LastWriteWinsMerge::write(&mut remote.data, &field, json!(i * 2), (i as u64) ^ 1);
        }
        local.vector_clock = VectorClock::from_iter([("r1", 2), ("r2", 1)]);
        remote.vector_clock = VectorClock::from_iter([("r1", 1), ("r2", 2)]);

        group.throughput(Throughput::Elements(*fields as u64));
        group.bench_with_input(BenchmarkId::new("concurrent_lww", fields), fields, |b, _| {
            b.iter(|| black_box(manager.merge_states(&local, &remote, None)));
        });
    }

    group.bench_function("clock_compare", |b| {
        let local = VectorClock::from_iter((0..32).map(|i| (format!("r{i}"), i as u64)));
        let remote = VectorClock::from_iter((0..32).map(|i| (format!("r{i}"), 32 - i as u64)));
        b.iter(|| black_box(manager.compare_clocks(&local, &remote)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_append,
    bench_replay,
    bench_incremental_sync,
    bench_crdt_merge
);
criterion_main!(benches);
