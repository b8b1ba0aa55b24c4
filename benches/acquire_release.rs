// Acquire/release overhead with a resource that costs nothing to create,
// so only the pool's own bookkeeping is measured.

use std::hint::black_box;
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use resilient_pool::{
    CircuitBreaker, FnManager, PoolConfig, PoolResult, ResourceManager, ResourcePool,
};
use tokio::runtime::Runtime;

fn noop_manager() -> impl ResourceManager<u64> {
    FnManager::new(
        || async { PoolResult::Ok(0u64) },
        |_value: u64| async { PoolResult::Ok(()) },
        |_value: u64| async { PoolResult::Ok(true) },
    )
}

fn pool_config(max: usize) -> PoolConfig {
    PoolConfig::new()
        .with_min_connections(max.min(8))
        .with_max_connections(max)
        .with_acquire_timeout(Duration::from_secs(5))
        .with_idle_timeout(Duration::from_secs(3600))
        .with_max_lifetime(Duration::from_secs(3600))
        .with_health_check_interval(Duration::from_secs(3600))
}

fn multi_thread_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("failed to build runtime")
}

fn bench_acquire_release(c: &mut Criterion, name: &str, rt: &Runtime, max: usize) {
    let pool = rt
        .block_on(ResourcePool::new(noop_manager(), pool_config(max)))
        .expect("failed to create pool");

    c.bench_function(name, |b| {
        b.to_async(rt).iter(|| {
            let pool = pool.clone();
            async move {
                let guard = pool.acquire().await.unwrap();
                black_box(*guard);
                drop(guard);
            }
        });
    });

    rt.block_on(pool.dispose());
}

fn single_thread_throughput(c: &mut Criterion) {
    let rt = Runtime::new().expect("failed to build runtime");
    bench_acquire_release(c, "single_thread_acquire_release", &rt, 64);
}

fn multi_thread_throughput(c: &mut Criterion) {
    let rt = multi_thread_runtime();
    bench_acquire_release(c, "multi_thread_acquire_release", &rt, 64);
}

fn concurrent_contention(c: &mut Criterion) {
    let rt = multi_thread_runtime();
    let pool = rt
        .block_on(ResourcePool::new(noop_manager(), pool_config(4)))
        .expect("failed to create pool");

    // Sixteen callers share four slots, so most acquires wait for a hand-off
    c.bench_function("contended_acquire_release_4slots", |b| {
        b.to_async(&rt).iter(|| {
            let pool = pool.clone();
            async move {
                let mut tasks = Vec::with_capacity(16);
                for _ in 0..16 {
                    let pool = pool.clone();
                    tasks.push(tokio::spawn(async move {
                        let guard = pool.acquire().await.unwrap();
                        tokio::task::yield_now().await;
                        drop(guard);
                    }));
                }
                for task in tasks {
                    task.await.unwrap();
                }
            }
        });
    });

    rt.block_on(pool.dispose());
}

fn breaker_overhead(c: &mut Criterion) {
    let rt = Runtime::new().expect("failed to build runtime");
    let breaker = CircuitBreaker::default();

    c.bench_function("circuit_breaker_closed_execute", |b| {
        b.to_async(&rt).iter(|| async {
            let value = breaker
                .execute(|| async { PoolResult::Ok(black_box(1u64)) })
                .await
                .unwrap();
            black_box(value)
        });
    });
}

criterion_group!(
    benches,
    single_thread_throughput,
    multi_thread_throughput,
    concurrent_contention,
    breaker_overhead,
);
criterion_main!(benches);
