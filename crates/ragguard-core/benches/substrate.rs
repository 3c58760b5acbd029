//! Substrate hot-path benchmarks
//!
//! Measures:
//! - Cache hits and inserts under each eviction policy
//! - Inserts that force an eviction on every call
//! - Pool acquire/release round trips
//! - Metric summaries over a full series

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ragguard_core::{
    labels, CacheConfig, CacheEngine, ConnectionPool, EvictionPolicy, MetricsRecorder,
    MonitorConfig, PoolConfig, ResourceFactory, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

struct Counter;

#[async_trait::async_trait]
impl ResourceFactory<u64> for Counter {
    async fn create(&self) -> Result<u64> {
        Ok(0)
    }
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn bench_cache_get_set(c: &mut Criterion) {
    let rt = runtime();
    let _guard = rt.enter();
    let mut group = c.benchmark_group("cache_get_set");

    for policy in [EvictionPolicy::Lru, EvictionPolicy::Lfu] {
        let cache = CacheEngine::<String>::new(
            "bench",
            CacheConfig::default()
                .with_max_entries(1024)
                .with_eviction_policy(policy),
        )
        .unwrap();
        for i in 0..512 {
            cache.set(format!("key-{}", i), format!("value-{}", i)).unwrap();
        }

        group.bench_with_input(
            BenchmarkId::new("hit", format!("{:?}", policy)),
            &cache,
            |b, cache| {
                let mut i = 0usize;
                b.iter(|| {
                    i = (i + 1) % 512;
                    black_box(cache.get(&format!("key-{}", i)))
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("overwrite", format!("{:?}", policy)),
            &cache,
            |b, cache| {
                let mut i = 0usize;
                b.iter(|| {
                    i = (i + 1) % 512;
                    cache
                        .set(format!("key-{}", i), black_box("updated".to_string()))
                        .unwrap()
                });
            },
        );
    }

    group.finish();
}

fn bench_cache_eviction(c: &mut Criterion) {
    let rt = runtime();
    let _guard = rt.enter();
    let mut group = c.benchmark_group("cache_eviction");

    for capacity in [64, 1024, 16384] {
        let cache = CacheEngine::<String>::new(
            "bench",
            CacheConfig::default().with_max_entries(capacity),
        )
        .unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &cache, |b, cache| {
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                cache.set(format!("key-{}", i), "v".to_string()).unwrap()
            });
        });
    }

    group.finish();
}

fn bench_pool_round_trip(c: &mut Criterion) {
    let rt = runtime();
    let pool = rt
        .block_on(ConnectionPool::<u64>::new(
            PoolConfig::named("bench").with_sizes(4, 4),
            Arc::new(Counter),
        ))
        .unwrap();

    c.bench_function("pool_acquire_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                let lease = pool.acquire(Duration::from_secs(1)).await.unwrap();
                black_box(*lease);
                pool.release(lease, false);
            })
        });
    });

    rt.block_on(pool.shutdown());
}

fn bench_metric_summary(c: &mut Criterion) {
    let mut group = c.benchmark_group("metric_summary");
    let series = labels(&[("target", "llm")]);

    for points in [100, 1000, 10000] {
        let recorder = MetricsRecorder::new(&MonitorConfig {
            max_points_per_series: points,
            ..MonitorConfig::default()
        });
        for i in 0..points {
            recorder.record_histogram("latency_ms", (i % 250) as f64, &series);
        }

        group.bench_with_input(
            BenchmarkId::from_parameter(points),
            &recorder,
            |b, recorder| {
                b.iter(|| {
                    recorder
                        .get_summary(black_box("latency_ms"), None, Duration::from_secs(60))
                        .unwrap()
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_cache_get_set,
    bench_cache_eviction,
    bench_pool_round_trip,
    bench_metric_summary
);
criterion_main!(benches);
