//! Application context
//!
//! Owns the performance monitor, the pool and cache registries, one circuit
//! breaker per call target, and the root cancellation token every background
//! loop is derived from. Build one per process (or per test) and pass it to
//! the components that need it.

use crate::cache::{CacheEngine, EstimateSize};
use crate::config::{CacheConfig, Config, PoolConfig};
use crate::error::Result;
use crate::llm::{ChatClient, HttpSessionFactory};
use crate::monitor::PerformanceMonitor;
use crate::pool::{ConnectionPool, ResourceFactory};
use crate::registry::{CacheRegistry, PoolRegistry};
use crate::resilience::{BreakerSnapshot, CircuitBreaker, GuardedCall, RetryPolicy};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Pool, cache and breaker name used by the chat client
pub const LLM_TARGET: &str = "llm";

pub struct AppContext {
    config: Config,
    token: CancellationToken,
    monitor: Arc<PerformanceMonitor>,
    pools: PoolRegistry,
    caches: CacheRegistry,
    breakers: Mutex<BTreeMap<String, Arc<CircuitBreaker>>>,
    shut_down: AtomicBool,
}

impl AppContext {
    /// Validate `config` and start the monitor.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let token = CancellationToken::new();
        let monitor = Arc::new(PerformanceMonitor::new(&config.monitor, token.clone())?);
        Ok(Self {
            config,
            token,
            monitor,
            pools: PoolRegistry::new(),
            caches: CacheRegistry::new(),
            breakers: Mutex::new(BTreeMap::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Root token; cancelling it stops every background loop
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn pools(&self) -> &PoolRegistry {
        &self.pools
    }

    pub fn caches(&self) -> &CacheRegistry {
        &self.caches
    }

    fn pool_config(&self, name: &str) -> PoolConfig {
        self.config
            .pools
            .get(name)
            .cloned()
            .unwrap_or_else(|| PoolConfig::named(name))
    }

    fn cache_config(&self, name: &str) -> CacheConfig {
        self.config.caches.get(name).cloned().unwrap_or_default()
    }

    /// Build and register the pool `name` using its configured settings
    pub async fn register_pool<R: Send + 'static>(
        &self,
        name: &str,
        factory: Arc<dyn ResourceFactory<R>>,
    ) -> Result<Arc<ConnectionPool<R>>> {
        let pool = Arc::new(
            ConnectionPool::with_context(
                self.pool_config(name),
                factory,
                &self.token,
                Some(self.monitor.recorder().clone()),
            )
            .await?,
        );
        if let Err(e) = self.pools.register(pool.clone()) {
            pool.shutdown().await;
            return Err(e);
        }
        Ok(pool)
    }

    /// Build and register the cache `name` using its configured settings
    pub fn register_cache<V>(&self, name: &str) -> Result<Arc<CacheEngine<V>>>
    where
        V: Clone + EstimateSize + Send + Sync + 'static,
    {
        let cache = Arc::new(CacheEngine::with_token(
            name,
            self.cache_config(name),
            self.token.clone(),
        )?);
        self.caches.register(cache.clone())?;
        Ok(cache)
    }

    fn lock_breakers(&self) -> MutexGuard<'_, BTreeMap<String, Arc<CircuitBreaker>>> {
        match self.breakers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The breaker for `target`, created on first use
    pub fn breaker(&self, target: &str) -> Result<Arc<CircuitBreaker>> {
        let mut breakers = self.lock_breakers();
        if let Some(breaker) = breakers.get(target) {
            return Ok(breaker.clone());
        }
        let breaker = Arc::new(CircuitBreaker::new(target, self.config.breaker.clone())?);
        breakers.insert(target.to_string(), breaker.clone());
        Ok(breaker)
    }

    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.lock_breakers()
            .values()
            .map(|b| b.snapshot())
            .collect()
    }

    /// Breaker and retry policy for calls to `target`, reporting to the
    /// monitor
    pub fn guarded_call(&self, target: &str) -> Result<GuardedCall> {
        Ok(GuardedCall::new(
            target,
            self.breaker(target)?,
            RetryPolicy::new(self.config.retry.clone())?,
        )
        .with_metrics(self.monitor.recorder().clone()))
    }

    /// Chat client for the configured LLM service. The `llm` pool and cache
    /// are registered on first use and shared afterwards.
    pub async fn chat_client(&self) -> Result<ChatClient> {
        let pool = match self.pools.get::<reqwest::Client>(LLM_TARGET) {
            Some(pool) => pool,
            None => {
                let factory = Arc::new(HttpSessionFactory::from_config(&self.config.llm_service));
                self.register_pool::<reqwest::Client>(LLM_TARGET, factory).await?
            }
        };
        let cache = match self.caches.get::<String>(LLM_TARGET) {
            Some(cache) => cache,
            None => self.register_cache::<String>(LLM_TARGET)?,
        };
        let guard = Arc::new(self.guarded_call(LLM_TARGET)?);
        Ok(ChatClient::new(
            self.config.llm_service.clone(),
            pool,
            cache,
            guard,
        ))
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Shut down every pool, cache and background loop. Safe to call
    /// repeatedly.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pools.shutdown_all().await;
        self.caches.shutdown_all().await;
        self.monitor.shutdown().await;
        self.token.cancel();
        tracing::info!("Application context shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagGuardError;
    use async_trait::async_trait;

    struct Unit;

    #[async_trait]
    impl ResourceFactory<()> for Unit {
        async fn create(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_register_uses_named_config() {
        let mut config = Config::default();
        config
            .pools
            .insert("db".to_string(), PoolConfig::named("db").with_sizes(1, 2));
        let ctx = AppContext::new(config).unwrap();

        let pool = ctx.register_pool::<()>("db", Arc::new(Unit)).await.unwrap();
        assert_eq!(pool.get_stats().max_size, 2);
        assert_eq!(pool.get_stats().total, 1);

        let err = ctx.register_pool::<()>("db", Arc::new(Unit)).await.unwrap_err();
        assert!(matches!(err, RagGuardError::Config(_)));

        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_breakers_are_shared_per_target() {
        let ctx = AppContext::new(Config::default()).unwrap();
        let a = ctx.breaker("search").unwrap();
        let b = ctx.guarded_call("search").unwrap();
        assert!(Arc::ptr_eq(&a, b.breaker()));
        assert_eq!(ctx.breaker_snapshots().len(), 1);
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_chat_client_reuses_registrations() {
        let ctx = AppContext::new(Config::default()).unwrap();
        ctx.chat_client().await.unwrap();
        ctx.chat_client().await.unwrap();
        assert_eq!(ctx.pools().names(), vec![LLM_TARGET.to_string()]);
        assert_eq!(ctx.caches().names(), vec![LLM_TARGET.to_string()]);
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let ctx = AppContext::new(Config::default()).unwrap();
        let pool = ctx.register_pool::<()>("units", Arc::new(Unit)).await.unwrap();
        let cache = ctx.register_cache::<String>("answers").unwrap();
        cache.set("k", "v".to_string()).unwrap();

        ctx.shutdown().await;
        ctx.shutdown().await;

        assert!(ctx.is_shut_down());
        assert!(ctx.token().is_cancelled());
        assert_eq!(pool.get_stats().total, 0);
        assert_eq!(cache.len(), 0);
    }
}
