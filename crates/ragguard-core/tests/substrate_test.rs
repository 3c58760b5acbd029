//! End-to-end behaviour of pools, caches, breakers and alerts wired through
//! an `AppContext`

use async_trait::async_trait;
use futures::future::join_all;
use ragguard_core::monitor::AlertStatistic;
use ragguard_core::{
    labels, AlertRule, AppContext, BreakerConfig, CacheConfig, CircuitState, Comparator, Config,
    EvictionPolicy, PoolConfig, RagGuardError, ResourceFactory, Result, RetryConfig,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Sessions {
    created: AtomicU32,
}

impl Sessions {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            created: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ResourceFactory<u32> for Sessions {
    async fn create(&self) -> Result<u32> {
        Ok(self.created.fetch_add(1, Ordering::SeqCst))
    }

    fn name(&self) -> &str {
        "sessions"
    }
}

fn config_with_pool(min: usize, max: usize) -> Config {
    let mut config = Config::default();
    config.pools.insert(
        "vector_store".to_string(),
        PoolConfig::named("vector_store")
            .with_sizes(min, max)
            .with_acquire_timeout(Duration::from_millis(200)),
    );
    config.retry = RetryConfig::new(1, Duration::from_millis(10)).with_jitter(Duration::ZERO);
    config.breaker = BreakerConfig::new(2, Duration::from_secs(30));
    config
}

#[tokio::test(start_paused = true)]
async fn test_pool_never_exceeds_max_and_reports_exhaustion() {
    let ctx = AppContext::new(config_with_pool(1, 2)).unwrap();
    let factory = Sessions::new();
    let pool = ctx
        .register_pool::<u32>("vector_store", factory.clone())
        .await
        .unwrap();

    let a = pool.acquire_default().await.unwrap();
    let b = pool.acquire_default().await.unwrap();
    assert_eq!(pool.get_stats().active, 2);

    let err = pool.acquire_default().await.unwrap_err();
    assert!(err.is_pool_exhausted());
    assert!(err.user_message().contains("busy"));
    assert_eq!(factory.created.load(Ordering::SeqCst), 2);

    let stats = pool.get_stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.exhaustion_count, 1);
    assert!((stats.utilization - 1.0).abs() < f64::EPSILON);

    let exhausted = ctx
        .monitor()
        .get_summary(
            "pool.exhausted",
            Some(&labels(&[("pool", "vector_store")])),
            Duration::from_secs(60),
        )
        .unwrap();
    assert_eq!(exhausted.sum, 1.0);

    pool.release(a, false);
    pool.release(b, false);
    ctx.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_waiter_is_served_by_release() {
    let ctx = AppContext::new(config_with_pool(1, 1)).unwrap();
    let pool = ctx
        .register_pool::<u32>("vector_store", Sessions::new())
        .await
        .unwrap();

    let held = pool.acquire_default().await.unwrap();
    let held_id = held.id();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire(Duration::from_secs(5)).await.map(|l| l.id()) })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.release(held, false);

    let served = waiter.await.unwrap().unwrap();
    assert_eq!(served, held_id);
    ctx.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_wakes_waiters_with_pool_closed() {
    let ctx = AppContext::new(config_with_pool(1, 1)).unwrap();
    let pool = ctx
        .register_pool::<u32>("vector_store", Sessions::new())
        .await
        .unwrap();
    let held = pool.acquire_default().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire(Duration::from_secs(60)).await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    ctx.shutdown().await;
    ctx.shutdown().await;

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, RagGuardError::PoolClosed(_)));
    assert!(pool.is_closed());
    drop(held);
    assert_eq!(pool.get_stats().total, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cache_coalesces_and_expires() {
    let mut config = Config::default();
    config.caches.insert(
        "answers".to_string(),
        CacheConfig::default()
            .with_max_entries(2)
            .with_default_ttl(Some(Duration::from_secs(10)))
            .with_eviction_policy(EvictionPolicy::Lru),
    );
    let ctx = AppContext::new(config).unwrap();
    let cache = ctx.register_cache::<String>("answers").unwrap();
    let computes = &AtomicU32::new(0);
    let engine = &*cache;

    let callers = (0..8).map(move |_| {
        engine.get_or_compute(
            "what is rag?",
            move || {
                computes.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok("retrieval augmented generation".to_string())
                }
            },
            None,
            true,
        )
    });
    let answers = join_all(callers).await;

    assert_eq!(computes.load(Ordering::SeqCst), 1);
    assert!(answers
        .iter()
        .all(|a| a.as_deref().ok() == Some("retrieval augmented generation")));
    assert_eq!(cache.get_stats().coalesced, 7);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(cache.get("what is rag?").is_none());

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_cache_lru_keeps_recently_read_entries() {
    let mut config = Config::default();
    config.caches.insert(
        "answers".to_string(),
        CacheConfig::default()
            .with_max_entries(2)
            .with_eviction_policy(EvictionPolicy::Lru),
    );
    let ctx = AppContext::new(config).unwrap();
    let cache = ctx.register_cache::<String>("answers").unwrap();

    cache.set("a", "1".to_string()).unwrap();
    cache.set("b", "2".to_string()).unwrap();
    assert!(cache.get("a").is_some());
    cache.set("c", "3".to_string()).unwrap();

    assert!(cache.contains("a"));
    assert!(!cache.contains("b"));
    assert!(cache.contains("c"));
    assert_eq!(cache.get_stats().evictions, 1);
    ctx.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_then_recovers() {
    let ctx = AppContext::new(config_with_pool(1, 1)).unwrap();
    let guard = ctx.guarded_call("vector_store").unwrap();
    let healthy = &AtomicU32::new(0);

    for _ in 0..2 {
        let err = guard
            .call(|_| async {
                Err::<(), _>(RagGuardError::ExternalError("connection reset".to_string()))
            })
            .await
            .unwrap_err();
        assert!(!err.is_circuit_open());
    }
    assert_eq!(guard.breaker().state(), CircuitState::Open);

    let err = guard
        .call(move |_| async move {
            healthy.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(healthy.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(31)).await;
    guard
        .call(move |_| async move {
            healthy.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(healthy.load(Ordering::SeqCst), 1);
    assert_eq!(guard.breaker().state(), CircuitState::Closed);

    let snapshots = ctx.breaker_snapshots();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].state, CircuitState::Closed);
    ctx.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_alert_fires_only_after_sustained_breach() {
    let mut config = Config::default();
    config.monitor.evaluation_interval = Duration::from_secs(3600);
    let ctx = AppContext::new(config).unwrap();
    let monitor = ctx.monitor();
    monitor
        .add_alert_rule(
            AlertRule::new("slow_llm", "llm.latency_ms", Comparator::GreaterThan, 1000.0)
                .with_statistic(AlertStatistic::Mean)
                .with_sustain(Duration::from_secs(5))
                .with_cooldown(Duration::from_secs(60)),
        )
        .unwrap();
    let alerts = monitor.alerts();

    monitor.record_histogram("llm.latency_ms", 2500.0, &labels(&[]));
    assert!(alerts.evaluate_now().fired.is_empty());

    tokio::time::advance(Duration::from_secs(3)).await;
    monitor.record_histogram("llm.latency_ms", 2500.0, &labels(&[]));
    assert!(alerts.evaluate_now().fired.is_empty());

    tokio::time::advance(Duration::from_secs(3)).await;
    monitor.record_histogram("llm.latency_ms", 2500.0, &labels(&[]));
    let report = alerts.evaluate_now();
    assert_eq!(report.fired, vec!["slow_llm".to_string()]);
    assert_eq!(alerts.active_alerts().len(), 1);

    tokio::time::advance(Duration::from_secs(20)).await;
    let report = alerts.evaluate_now();
    assert_eq!(report.resolved, vec!["slow_llm".to_string()]);
    assert!(alerts.active_alerts().is_empty());
    assert!(alerts.history(10)[0].is_resolved());

    ctx.shutdown().await;
}

#[test]
fn test_config_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.yml");

    let mut config = config_with_pool(2, 8);
    config.monitor.alert_rules.push(
        AlertRule::new("pool_busy", "pool.utilization", Comparator::GreaterOrEqual, 0.9)
            .with_sustain(Duration::from_millis(1500)),
    );
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    let pool = &loaded.pools["vector_store"];
    assert_eq!(pool.name, "vector_store");
    assert_eq!((pool.min_size, pool.max_size), (2, 8));
    assert_eq!(pool.acquire_timeout, Duration::from_millis(200));
    assert_eq!(loaded.breaker.failure_threshold, 2);
    assert_eq!(
        loaded.monitor.alert_rules[0].sustain_duration,
        Duration::from_millis(1500)
    );

    let missing = Config::load_from(&dir.path().join("absent.yml")).unwrap();
    assert!(missing.pools.is_empty());
}

#[test]
fn test_invalid_config_is_rejected() {
    let err = Config::from_yaml("pools:\n  broken:\n    min_size: 4\n    max_size: 2\n").unwrap_err();
    assert!(matches!(err, RagGuardError::Config(_)));
}
