//! In-memory cache with TTL, LRU/LFU eviction and request coalescing
//!
//! Every `get` checks expiry on the spot; a background sweep also drops
//! expired entries on `cleanup_interval`. Value sizes are estimated through
//! [`EstimateSize`] and the total is kept under `max_memory_bytes`.
//!
//! `get_or_compute` with coalescing enabled runs at most one computation per
//! key at a time. The first caller to miss registers itself as the leader
//! before invoking the compute closure; later callers for the same key never
//! invoke theirs and await the leader's published result instead.

mod entry;
mod keys;

pub use entry::{CacheEntry, EstimateSize, DEFAULT_ENTRY_SIZE};
pub use keys::request_cache_key;

use crate::config::{CacheConfig, EvictionPolicy};
use crate::error::{RagGuardError, Result};
use crate::runtime::BackgroundTask;
use entry::RankKey;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Response-time samples kept for the rolling average
const RESPONSE_TIME_SAMPLES: usize = 1000;

type SharedResult<V> = std::result::Result<V, Arc<RagGuardError>>;
type InflightFuture<V> = Shared<BoxFuture<'static, SharedResult<V>>>;

/// Role of a `get_or_compute` caller for one key
enum Flight<V> {
    /// Runs the computation and publishes its result
    Leader(oneshot::Sender<SharedResult<V>>),
    Follower(InflightFuture<V>),
}

/// Drops the in-flight entry if the leader is cancelled before finishing
struct InflightRegistration<'a, V: Clone + EstimateSize + Send + Sync + 'static> {
    inner: &'a CacheInner<V>,
    key: &'a str,
    armed: bool,
}

impl<V: Clone + EstimateSize + Send + Sync + 'static> Drop for InflightRegistration<'_, V> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.lock().inflight.remove(self.key);
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    expired: u64,
    coalesced: u64,
    computes: u64,
    rejected: u64,
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Eviction order; the first key is the next victim
    order: BTreeMap<RankKey, String>,
    inflight: HashMap<String, InflightFuture<V>>,
    memory_bytes: usize,
    next_seq: u64,
    response_times_ms: VecDeque<f64>,
    counters: Counters,
}

impl<V: Clone> CacheState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            inflight: HashMap::new(),
            memory_bytes: 0,
            next_seq: 0,
            response_times_ms: VecDeque::new(),
            counters: Counters::default(),
        }
    }

    fn rank(&mut self, policy: EvictionPolicy, access_count: u64) -> RankKey {
        self.next_seq += 1;
        match policy {
            EvictionPolicy::Lru => (0, self.next_seq),
            EvictionPolicy::Lfu => (access_count, self.next_seq),
        }
    }

    /// Record a hit on a live entry and return its value
    fn touch(&mut self, key: &str, policy: EvictionPolicy, now: Instant) -> Option<V> {
        let access_count = self.entries.get(key)?.access_count + 1;
        let new_rank = self.rank(policy, access_count);
        let entry = self.entries.get_mut(key)?;
        entry.access_count = access_count;
        entry.last_accessed_at = now;
        let old_rank = std::mem::replace(&mut entry.rank, new_rank);
        let value = entry.value.clone();
        self.order.remove(&old_rank);
        self.order.insert(new_rank, key.to_string());
        Some(value)
    }

    /// Look up a live entry, dropping it if it has expired
    fn lookup(&mut self, key: &str, policy: EvictionPolicy, now: Instant) -> Option<V> {
        let expired = self.entries.get(key).map(|e| e.is_expired(now))?;
        if expired {
            self.remove(key);
            self.counters.expired += 1;
            return None;
        }
        self.touch(key, policy, now)
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.rank);
        self.memory_bytes = self.memory_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.counters.expired += expired.len() as u64;
        expired.len()
    }

    fn evict_one(&mut self) -> bool {
        let Some((_, key)) = self.order.pop_first() else {
            return false;
        };
        if let Some(entry) = self.entries.remove(&key) {
            self.memory_bytes = self.memory_bytes.saturating_sub(entry.size_bytes);
        }
        self.counters.evictions += 1;
        tracing::debug!("Evicted cache entry {}", key);
        true
    }

    fn record_response(&mut self, elapsed: Duration) {
        self.response_times_ms
            .push_back(elapsed.as_secs_f64() * 1000.0);
        while self.response_times_ms.len() > RESPONSE_TIME_SAMPLES {
            self.response_times_ms.pop_front();
        }
    }
}

struct CacheInner<V> {
    name: String,
    config: CacheConfig,
    state: Mutex<CacheState<V>>,
}

impl<V> CacheInner<V>
where
    V: Clone + EstimateSize + Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn insert(&self, key: String, value: V, ttl: Option<Duration>) -> Result<()> {
        let mut state = self.lock();
        self.insert_locked(&mut state, key, value, ttl)
    }

    fn insert_locked(
        &self,
        state: &mut CacheState<V>,
        key: String,
        value: V,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let size = value.estimated_size();
        if size > self.config.max_memory_bytes {
            state.counters.rejected += 1;
            return Err(RagGuardError::InvalidInput(format!(
                "value for '{}' ({} bytes) exceeds cache '{}' budget of {} bytes",
                key, size, self.name, self.config.max_memory_bytes
            )));
        }

        let now = Instant::now();
        state.remove(&key);

        let over_budget = |s: &CacheState<V>| {
            s.entries.len() >= self.config.max_entries
                || s.memory_bytes + size > self.config.max_memory_bytes
        };
        if over_budget(state) {
            state.purge_expired(now);
        }
        while over_budget(state) && state.evict_one() {}

        let mut entry = CacheEntry::new(value, ttl, size, now);
        entry.rank = state.rank(self.config.eviction_policy, 0);
        state.order.insert(entry.rank, key.clone());
        state.memory_bytes += size;
        state.entries.insert(key, entry);
        Ok(())
    }

    fn finish_compute(&self, key: &str, result: &SharedResult<V>, ttl: Option<Duration>) {
        let mut state = self.lock();
        state.inflight.remove(key);
        if let Ok(value) = result {
            if let Err(e) = self.insert_locked(&mut state, key.to_string(), value.clone(), ttl) {
                tracing::warn!("Computed value not cached: {}", e);
            }
        }
    }

    fn purge_expired(&self) -> usize {
        self.lock().purge_expired(Instant::now())
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub name: String,
    pub size: usize,
    pub max_entries: usize,
    pub memory_usage_bytes: usize,
    pub max_memory_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expired: u64,
    /// Callers that joined an in-flight computation
    pub coalesced: u64,
    pub computes: u64,
    pub inflight: usize,
    pub rejected: u64,
    pub avg_response_time_ms: f64,
}

/// Thread-safe cache keyed by string
pub struct CacheEngine<V> {
    inner: Arc<CacheInner<V>>,
    sweeper: Mutex<Option<BackgroundTask>>,
}

impl<V> CacheEngine<V>
where
    V: Clone + EstimateSize + Send + Sync + 'static,
{
    /// Create a cache and start its expiry sweep.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Result<Self> {
        Self::with_token(name, config, CancellationToken::new())
    }

    /// Create a cache whose sweep stops when `token` is cancelled
    pub fn with_token(
        name: impl Into<String>,
        config: CacheConfig,
        token: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let name = name.into();
        let interval = config.cleanup_interval;
        let inner = Arc::new(CacheInner {
            name: name.clone(),
            config,
            state: Mutex::new(CacheState::new()),
        });

        let weak = Arc::downgrade(&inner);
        let sweeper = BackgroundTask::spawn_periodic(
            format!("cache-sweep:{}", name),
            interval,
            token.child_token(),
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        let purged = inner.purge_expired();
                        if purged > 0 {
                            tracing::debug!("Cache {} purged {} expired entries", inner.name, purged);
                        }
                    }
                }
            },
        )?;

        Ok(Self {
            inner,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Get a live value; expired entries are dropped and count as misses
    pub fn get(&self, key: &str) -> Option<V> {
        let mut state = self.inner.lock();
        let value = state.lookup(key, self.inner.config.eviction_policy, Instant::now());
        match value {
            Some(_) => state.counters.hits += 1,
            None => state.counters.misses += 1,
        }
        value
    }

    /// Set a value with the configured default TTL
    pub fn set(&self, key: impl Into<String>, value: V) -> Result<()> {
        self.inner
            .insert(key.into(), value, self.inner.config.default_ttl)
    }

    /// Set a value with an explicit TTL
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) -> Result<()> {
        self.inner.insert(key.into(), value, Some(ttl))
    }

    /// Remove an entry; returns whether it was present
    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Whether a live entry exists, without touching its recency or stats
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.entries.clear();
        state.order.clear();
        state.memory_bytes = 0;
    }

    /// Drop expired entries now; returns how many were removed
    pub fn cleanup_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Return the cached value or compute, cache and return it.
    ///
    /// `ttl = None` uses the configured default. With `coalesce`, concurrent
    /// misses on the same key share one computation; a failure reaches every
    /// waiting caller as [`RagGuardError::Coalesced`] and nothing is cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        compute: F,
        ttl: Option<Duration>,
        coalesce: bool,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let started = Instant::now();
        let ttl = ttl.or(self.inner.config.default_ttl);

        if let Some(value) = self.get(key) {
            self.inner.lock().record_response(started.elapsed());
            return Ok(value);
        }

        if !coalesce {
            self.inner.lock().counters.computes += 1;
            let result = compute().await;
            if let Ok(value) = &result {
                if let Err(e) = self.inner.insert(key.to_string(), value.clone(), ttl) {
                    tracing::warn!("Computed value not cached: {}", e);
                }
            }
            self.inner.lock().record_response(started.elapsed());
            return result;
        }

        let flight = {
            let mut state = self.inner.lock();
            if let Some(existing) = state.inflight.get(key) {
                let existing = existing.clone();
                state.counters.coalesced += 1;
                Flight::Follower(existing)
            } else if let Some(value) =
                state.lookup(key, self.inner.config.eviction_policy, Instant::now())
            {
                // Filled by a computation that finished after our miss
                state.record_response(started.elapsed());
                return Ok(value);
            } else {
                let (tx, rx) = oneshot::channel::<SharedResult<V>>();
                let name = self.inner.name.clone();
                let waiter = async move {
                    rx.await.unwrap_or_else(|_| {
                        Err(Arc::new(RagGuardError::ExternalError(format!(
                            "computation for cache '{}' was abandoned",
                            name
                        ))))
                    })
                }
                .boxed()
                .shared();
                state.inflight.insert(key.to_string(), waiter);
                state.counters.computes += 1;
                Flight::Leader(tx)
            }
        };

        let result = match flight {
            Flight::Follower(shared) => shared.await,
            Flight::Leader(tx) => {
                let mut registration = InflightRegistration {
                    inner: self.inner.as_ref(),
                    key,
                    armed: true,
                };
                let result = compute().await.map_err(Arc::new);
                self.inner.finish_compute(key, &result, ttl);
                registration.armed = false;
                let _ = tx.send(result.clone());
                result
            }
        };
        self.inner.lock().record_response(started.elapsed());
        result.map_err(RagGuardError::Coalesced)
    }

    pub fn get_stats(&self) -> CacheStats {
        let state = self.inner.lock();
        let c = &state.counters;
        let total_requests = c.hits + c.misses;
        let avg_response_time_ms = if state.response_times_ms.is_empty() {
            0.0
        } else {
            state.response_times_ms.iter().sum::<f64>() / state.response_times_ms.len() as f64
        };

        CacheStats {
            name: self.inner.name.clone(),
            size: state.entries.len(),
            max_entries: self.inner.config.max_entries,
            memory_usage_bytes: state.memory_bytes,
            max_memory_bytes: self.inner.config.max_memory_bytes,
            hits: c.hits,
            misses: c.misses,
            total_requests,
            hit_rate: if total_requests > 0 {
                c.hits as f64 / total_requests as f64
            } else {
                0.0
            },
            evictions: c.evictions,
            expired: c.expired,
            coalesced: c.coalesced,
            computes: c.computes,
            inflight: state.inflight.len(),
            rejected: c.rejected,
            avg_response_time_ms,
        }
    }

    /// Stop the sweep and drop all entries. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let sweeper = match self.sweeper.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
        self.clear();
        self.inner.lock().inflight.clear();
    }
}
