//! Named pool and cache registries
//!
//! Each pool or cache is built once at startup and registered under a unique
//! name. Lookups are typed: `get::<R>` returns the concrete
//! `ConnectionPool<R>` (or `CacheEngine<V>`) registered under that name.

use crate::cache::{CacheEngine, CacheStats, EstimateSize};
use crate::error::{RagGuardError, Result};
use crate::pool::{ConnectionPool, PoolStats};
use async_trait::async_trait;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Type-erased view of a registered pool
#[async_trait]
pub trait PoolHandle: Send + Sync {
    fn name(&self) -> &str;
    fn stats(&self) -> PoolStats;
    async fn shutdown(&self);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

#[async_trait]
impl<R: Send + 'static> PoolHandle for ConnectionPool<R> {
    fn name(&self) -> &str {
        ConnectionPool::name(self)
    }

    fn stats(&self) -> PoolStats {
        self.get_stats()
    }

    async fn shutdown(&self) {
        ConnectionPool::shutdown(self).await;
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Type-erased view of a registered cache
#[async_trait]
pub trait CacheHandle: Send + Sync {
    fn name(&self) -> &str;
    fn stats(&self) -> CacheStats;
    async fn shutdown(&self);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

#[async_trait]
impl<V> CacheHandle for CacheEngine<V>
where
    V: Clone + EstimateSize + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        CacheEngine::name(self)
    }

    fn stats(&self) -> CacheStats {
        self.get_stats()
    }

    async fn shutdown(&self) {
        CacheEngine::shutdown(self).await;
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Name to handle map shared by both registries
struct Named<H: ?Sized> {
    kind: &'static str,
    entries: RwLock<BTreeMap<String, Arc<H>>>,
}

impl<H: ?Sized> Named<H> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<H>>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<H>>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn insert(&self, name: &str, handle: Arc<H>) -> Result<()> {
        let mut entries = self.write();
        if entries.contains_key(name) {
            return Err(RagGuardError::Config(format!(
                "{} '{}' is already registered",
                self.kind, name
            )));
        }
        entries.insert(name.to_string(), handle);
        Ok(())
    }

    fn get(&self, name: &str) -> Option<Arc<H>> {
        self.read().get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    fn all(&self) -> Vec<Arc<H>> {
        self.read().values().cloned().collect()
    }

    fn take_all(&self) -> Vec<Arc<H>> {
        std::mem::take(&mut *self.write()).into_values().collect()
    }
}

/// Pools keyed by name
pub struct PoolRegistry {
    pools: Named<dyn PoolHandle>,
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self {
            pools: Named::new("pool"),
        }
    }

    /// Register a pool under its configured name; duplicates are rejected
    pub fn register<R: Send + 'static>(&self, pool: Arc<ConnectionPool<R>>) -> Result<()> {
        let name = pool.name().to_string();
        self.pools.insert(&name, pool)
    }

    /// The pool registered as `name`, if it pools `R`
    pub fn get<R: Send + 'static>(&self, name: &str) -> Option<Arc<ConnectionPool<R>>> {
        self.pools
            .get(name)?
            .into_any()
            .downcast::<ConnectionPool<R>>()
            .ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pools.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.pools.names()
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools.all().iter().map(|p| p.stats()).collect()
    }

    /// Shut down and forget every pool
    pub async fn shutdown_all(&self) {
        for pool in self.pools.take_all() {
            pool.shutdown().await;
        }
    }
}

/// Caches keyed by name
pub struct CacheRegistry {
    caches: Named<dyn CacheHandle>,
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self {
            caches: Named::new("cache"),
        }
    }

    /// Register a cache under its name; duplicates are rejected
    pub fn register<V>(&self, cache: Arc<CacheEngine<V>>) -> Result<()>
    where
        V: Clone + EstimateSize + Send + Sync + 'static,
    {
        let name = cache.name().to_string();
        self.caches.insert(&name, cache)
    }

    /// The cache registered as `name`, if it holds `V`
    pub fn get<V>(&self, name: &str) -> Option<Arc<CacheEngine<V>>>
    where
        V: Clone + EstimateSize + Send + Sync + 'static,
    {
        self.caches
            .get(name)?
            .into_any()
            .downcast::<CacheEngine<V>>()
            .ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.caches.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.caches.names()
    }

    pub fn stats(&self) -> Vec<CacheStats> {
        self.caches.all().iter().map(|c| c.stats()).collect()
    }

    /// Shut down and forget every cache
    pub async fn shutdown_all(&self) {
        for cache in self.caches.take_all() {
            cache.shutdown().await;
        }
    }
}
