//! Task claiming benchmark
//!
//! Benchmarks the critical path: task enqueue → claim → complete
//! This is the core scheduling performance metric.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use compute_engine::executor::Outcome;
use compute_engine::persistence::{InMemoryTaskStore, TaskStore};
use compute_engine::task::PayloadRef;

async fn fill(store: &InMemoryTaskStore, task_count: u64) {
    for i in 0..task_count {
        store
            .enqueue(PayloadRef::new(format!("task-{}", i)))
            .await
            .unwrap();
    }
}

/// Benchmark single-worker claim + complete (baseline)
fn bench_claim_single(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("task_claiming/single");
    group.throughput(Throughput::Elements(1));

    group.bench_function("claim_complete", |b| {
        b.to_async(&rt).iter_custom(|iters| async move {
            let store = InMemoryTaskStore::new();
            let task_count = iters.max(100);
            fill(&store, task_count).await;

            // Measure claim time
            let start = Instant::now();
            while let Some(task) = store.claim_next("worker-1").await.unwrap() {
                store
                    .complete(task.id, "worker-1", Outcome::Success)
                    .await
                    .unwrap();
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Benchmark concurrent task claiming (contention)
fn bench_claim_concurrent(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("task_claiming/concurrent");
    group.sample_size(20);

    for workers in [2, 4, 8] {
        let task_count = 5000u64;
        group.throughput(Throughput::Elements(task_count));
        group.bench_with_input(
            BenchmarkId::new("workers", workers),
            &workers,
            |b, &workers| {
                b.to_async(&rt).iter(|| async {
                    let store = Arc::new(InMemoryTaskStore::new());
                    fill(&store, task_count).await;

                    let mut handles = Vec::new();
                    for worker_id in 0..workers {
                        let store = store.clone();
                        handles.push(tokio::spawn(async move {
                            let worker_name = format!("worker-{}", worker_id);
                            while let Some(task) = store.claim_next(&worker_name).await.unwrap() {
                                store
                                    .complete(task.id, &worker_name, Outcome::Success)
                                    .await
                                    .unwrap();
                            }
                        }));
                    }

                    for handle in handles {
                        handle.await.unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

/// Benchmark enqueue latency
fn bench_enqueue(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("task_claiming/enqueue");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single", |b| {
        b.to_async(&rt).iter_custom(|iters| async move {
            let store = InMemoryTaskStore::new();
            let start = Instant::now();
            fill(&store, iters).await;
            start.elapsed()
        });
    });

    group.finish();
}

/// Benchmark schedule-to-start latency
///
/// Reports the mean time between enqueue and claim across all tasks.
fn bench_schedule_to_start(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("task_claiming/schedule_to_start");
    group.throughput(Throughput::Elements(100));

    for workers in [1, 4, 8] {
        group.bench_with_input(
            BenchmarkId::new("workers", workers),
            &workers,
            |b, &workers| {
                b.to_async(&rt).iter_custom(|_iters| async move {
                    let store = Arc::new(InMemoryTaskStore::new());
                    let task_count = 100u64;
                    let enqueued_at = Instant::now();
                    fill(&store, task_count).await;

                    let total_latency = Arc::new(AtomicU64::new(0));
                    let claimed_count = Arc::new(AtomicU64::new(0));

                    let mut handles = Vec::new();
                    for worker_id in 0..workers {
                        let store = store.clone();
                        let total_latency = total_latency.clone();
                        let claimed_count = claimed_count.clone();

                        handles.push(tokio::spawn(async move {
                            let worker_name = format!("worker-{}", worker_id);
                            while let Some(task) = store.claim_next(&worker_name).await.unwrap() {
                                total_latency.fetch_add(
                                    enqueued_at.elapsed().as_nanos() as u64,
                                    Ordering::Relaxed,
                                );
                                claimed_count.fetch_add(1, Ordering::Relaxed);
                                store
                                    .complete(task.id, &worker_name, Outcome::Success)
                                    .await
                                    .unwrap();
                            }
                        }));
                    }

                    for handle in handles {
                        handle.await.unwrap();
                    }

                    let count = claimed_count.load(Ordering::Relaxed).max(1);
                    Duration::from_nanos(total_latency.load(Ordering::Relaxed) / count)
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_claim_single,
    bench_claim_concurrent,
    bench_enqueue,
    bench_schedule_to_start
);
criterion_main!(benches);
