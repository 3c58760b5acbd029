//! Generic async resource pool with health monitoring
//!
//! A [`ConnectionPool`] keeps between `min_size` and `max_size` resources
//! produced by an injected [`ResourceFactory`]. Callers lease resources with
//! [`ConnectionPool::acquire`], waiting up to a deadline when every resource
//! is busy, and hand them back with [`ConnectionPool::release`]. A background
//! health pass retires failed, aged and long-idle resources and tops the pool
//! back up to `min_size`.

mod factory;
mod lease;

pub use factory::ResourceFactory;
pub use lease::PooledResource;

use crate::config::PoolConfig;
use crate::error::{RagGuardError, Result};
use crate::monitor::{labels, Labels, MetricsRecorder};
use crate::runtime::BackgroundTask;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a pooled resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Idle,
    InUse,
    Failed,
    Closed,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceState::Idle => write!(f, "idle"),
            ResourceState::InUse => write!(f, "in_use"),
            ResourceState::Failed => write!(f, "failed"),
            ResourceState::Closed => write!(f, "closed"),
        }
    }
}

/// Pool bookkeeping for one resource. The resource itself is absent while
/// it is leased out.
struct Slot<R> {
    id: u64,
    resource: Option<R>,
    created_at: Instant,
    last_used_at: Instant,
    use_count: u64,
    state: ResourceState,
    error_count: u32,
}

struct PoolState<R> {
    slots: Vec<Slot<R>>,
    /// Creations in progress; they count against `max_size`
    pending: usize,
    closed: bool,
}

impl<R> PoolState<R> {
    fn size(&self) -> usize {
        self.slots.len() + self.pending
    }

    fn count(&self, state: ResourceState) -> usize {
        self.slots.iter().filter(|s| s.state == state).count()
    }

    fn remove(&mut self, id: u64) -> Option<Slot<R>> {
        let index = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.swap_remove(index))
    }

    /// Take every failed slot out of the pool, returning their resources
    fn take_failed(&mut self) -> Vec<R> {
        let mut taken = Vec::new();
        self.slots.retain_mut(|slot| {
            if slot.state == ResourceState::Failed {
                slot.state = ResourceState::Closed;
                taken.extend(slot.resource.take());
                false
            } else {
                true
            }
        });
        taken
    }
}

#[derive(Default)]
struct PoolCounters {
    created: AtomicU64,
    creation_failures: AtomicU64,
    closed: AtomicU64,
    close_errors: AtomicU64,
    acquisitions: AtomicU64,
    exhaustion_count: AtomicU64,
    total_wait_us: AtomicU64,
}

enum Checkout<R: Send + 'static> {
    Ready(PooledResource<R>),
    Create,
    Full,
}

pub(crate) struct PoolInner<R: Send + 'static> {
    config: PoolConfig,
    factory: Arc<dyn ResourceFactory<R>>,
    state: Mutex<PoolState<R>>,
    available: Notify,
    counters: PoolCounters,
    next_id: AtomicU64,
    token: CancellationToken,
    metrics: Option<Arc<MetricsRecorder>>,
    metric_labels: Labels,
}

/// Counts one in-progress creation against capacity until it is committed
/// or dropped.
struct Reservation<'a, R: Send + 'static> {
    inner: &'a PoolInner<R>,
    active: bool,
}

impl<R: Send + 'static> Drop for Reservation<'_, R> {
    fn drop(&mut self) {
        if self.active {
            {
                let mut state = self.inner.lock();
                state.pending = state.pending.saturating_sub(1);
            }
            self.inner.available.notify_one();
        }
    }
}

impl<R: Send + 'static> PoolInner<R> {
    fn lock(&self) -> MutexGuard<'_, PoolState<R>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn close_resources(&self, resources: Vec<R>) {
        for resource in resources {
            self.counters.closed.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.factory.close(resource) {
                self.counters.close_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Pool {}: failed to close {}: {}", self.name(), self.factory.name(), e);
            }
        }
    }

    /// Try to lease an idle resource or reserve room for a new one
    fn checkout(self: &Arc<Self>) -> Result<Checkout<R>> {
        let (outcome, reaped) = {
            let mut state = self.lock();
            if state.closed {
                return Err(RagGuardError::PoolClosed(self.config.name.clone()));
            }

            let now = Instant::now();
            let idle = state
                .slots
                .iter_mut()
                .find(|s| s.state == ResourceState::Idle && s.resource.is_some());
            if let Some(slot) = idle {
                if let Some(resource) = slot.resource.take() {
                    slot.state = ResourceState::InUse;
                    slot.use_count += 1;
                    slot.last_used_at = now;
                    let lease = PooledResource::new(
                        slot.id,
                        resource,
                        slot.created_at,
                        slot.use_count,
                        Arc::downgrade(self),
                    );
                    return Ok(Checkout::Ready(lease));
                }
            }

            let reaped = if state.size() >= self.config.max_size {
                state.take_failed()
            } else {
                Vec::new()
            };
            if state.size() < self.config.max_size {
                state.pending += 1;
                (Checkout::Create, reaped)
            } else {
                (Checkout::Full, reaped)
            }
        };
        self.close_resources(reaped);
        Ok(outcome)
    }

    /// Open a resource for a reservation taken by `checkout`. With `lease`
    /// the new resource is handed straight to the caller; otherwise it joins
    /// the pool as idle.
    async fn create(
        self: &Arc<Self>,
        mut reservation: Reservation<'_, R>,
        lease: bool,
    ) -> Result<Option<PooledResource<R>>> {
        let resource = match self.factory.create().await {
            Ok(resource) => resource,
            Err(e) => {
                self.counters.creation_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Pool {}: failed to create {}: {}",
                    self.name(),
                    self.factory.name(),
                    e
                );
                return Err(RagGuardError::ResourceCreation {
                    pool: self.config.name.clone(),
                    reason: e.to_string(),
                });
            }
        };
        self.counters.created.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();
        state.pending = state.pending.saturating_sub(1);
        reservation.active = false;

        if state.closed {
            drop(state);
            self.close_resources(vec![resource]);
            return Err(RagGuardError::PoolClosed(self.config.name.clone()));
        }

        let mut slot = Slot {
            id,
            resource: None,
            created_at: now,
            last_used_at: now,
            use_count: 0,
            state: ResourceState::Idle,
            error_count: 0,
        };
        if lease {
            slot.state = ResourceState::InUse;
            slot.use_count = 1;
            state.slots.push(slot);
            drop(state);
            tracing::debug!("Pool {}: created {} {} for lease", self.name(), self.factory.name(), id);
            Ok(Some(PooledResource::new(
                id,
                resource,
                now,
                1,
                Arc::downgrade(self),
            )))
        } else {
            slot.resource = Some(resource);
            state.slots.push(slot);
            drop(state);
            self.available.notify_one();
            Ok(None)
        }
    }

    fn reserve(&self) -> Reservation<'_, R> {
        Reservation {
            inner: self,
            active: true,
        }
    }

    /// Return a leased resource. Called by [`PooledResource`].
    pub(crate) fn check_in(&self, id: u64, resource: R, failed: bool) {
        let now = Instant::now();
        let retired = {
            let mut state = self.lock();
            match state.slots.iter().position(|s| s.id == id) {
                None => Some(resource),
                Some(index) => {
                    let aged = now.saturating_duration_since(state.slots[index].created_at)
                        > self.config.max_resource_age;
                    if state.closed || (aged && !failed) {
                        tracing::debug!("Pool {}: retiring resource {}", self.name(), id);
                        state.slots.swap_remove(index);
                        Some(resource)
                    } else {
                        let slot = &mut state.slots[index];
                        slot.last_used_at = now;
                        slot.resource = Some(resource);
                        if failed {
                            slot.state = ResourceState::Failed;
                            slot.error_count += 1;
                        } else {
                            slot.state = ResourceState::Idle;
                        }
                        None
                    }
                }
            }
        };
        if let Some(resource) = retired {
            self.close_resources(vec![resource]);
        }
        self.available.notify_one();
    }

    async fn run_health_check(self: &Arc<Self>) -> HealthReport {
        let now = Instant::now();
        let mut report = HealthReport::default();

        let removed = {
            let mut state = self.lock();
            if state.closed {
                return report;
            }

            let mut removed = state.take_failed();
            report.removed_failed = removed.len();

            let max_age = self.config.max_resource_age;
            state.slots.retain_mut(|slot| {
                let aged = slot.state == ResourceState::Idle
                    && now.saturating_duration_since(slot.created_at) > max_age;
                if aged {
                    slot.state = ResourceState::Closed;
                    removed.extend(slot.resource.take());
                    report.removed_aged += 1;
                }
                !aged
            });

            // Longest-idle first, and only while above min_size
            let max_idle = self.config.max_idle_duration;
            let mut stale: Vec<(Instant, u64)> = state
                .slots
                .iter()
                .filter(|s| {
                    s.state == ResourceState::Idle
                        && now.saturating_duration_since(s.last_used_at) > max_idle
                })
                .map(|s| (s.last_used_at, s.id))
                .collect();
            stale.sort();
            for (_, id) in stale {
                if state.slots.len() <= self.config.min_size {
                    break;
                }
                if let Some(mut slot) = state.remove(id) {
                    slot.state = ResourceState::Closed;
                    removed.extend(slot.resource.take());
                    report.removed_idle += 1;
                }
            }
            removed
        };
        let close_errors_before = self.counters.close_errors.load(Ordering::Relaxed);
        self.close_resources(removed);
        report.close_errors =
            (self.counters.close_errors.load(Ordering::Relaxed) - close_errors_before) as usize;

        loop {
            let reservation = {
                let mut state = self.lock();
                if state.closed || state.size() >= self.config.min_size {
                    break;
                }
                state.pending += 1;
                self.reserve()
            };
            match self.create(reservation, false).await {
                Ok(_) => report.created += 1,
                Err(_) => {
                    report.creation_failures += 1;
                    break;
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            let state = self.lock();
            let utilization =
                state.count(ResourceState::InUse) as f64 / self.config.max_size as f64;
            metrics.record_gauge("pool.utilization", utilization, &self.metric_labels);
        }

        if report.changed() {
            tracing::debug!("Pool {} health pass: {:?}", self.name(), report);
        }
        report
    }
}

/// Outcome of one health pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub removed_failed: usize,
    pub removed_aged: usize,
    pub removed_idle: usize,
    pub close_errors: usize,
    pub created: usize,
    pub creation_failures: usize,
}

impl HealthReport {
    fn changed(&self) -> bool {
        *self != HealthReport::default()
    }
}

/// Pool statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub name: String,
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub failed: usize,
    pub pending: usize,
    pub min_size: usize,
    pub max_size: usize,
    /// Leased resources as a fraction of `max_size`
    pub utilization: f64,
    pub exhaustion_count: u64,
    pub created: u64,
    pub creation_failures: u64,
    pub closed: u64,
    pub acquisitions: u64,
    pub avg_wait_ms: f64,
}

/// Per-resource view for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct ResourceInfo {
    pub id: u64,
    pub state: ResourceState,
    pub age_secs: f64,
    pub idle_secs: f64,
    pub use_count: u64,
    pub error_count: u32,
}

/// Async pool of resources created by a [`ResourceFactory`]
pub struct ConnectionPool<R: Send + 'static> {
    inner: Arc<PoolInner<R>>,
    health: Mutex<Option<BackgroundTask>>,
}

impl<R: Send + 'static> fmt::Debug for ConnectionPool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ConnectionPool")
            .field("name", &self.inner.config.name)
            .field("size", &state.size())
            .field("max_size", &self.inner.config.max_size)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl<R: Send + 'static> ConnectionPool<R> {
    /// Create a pool, open `min_size` resources and start health checks.
    ///
    /// Creation failures at startup are logged; the pool starts smaller and
    /// the health pass keeps trying.
    pub async fn new(config: PoolConfig, factory: Arc<dyn ResourceFactory<R>>) -> Result<Self> {
        Self::with_context(config, factory, &CancellationToken::new(), None).await
    }

    /// Like [`ConnectionPool::new`], stopping when `parent` is cancelled and
    /// reporting wait times and exhaustion to `metrics`
    pub async fn with_context(
        config: PoolConfig,
        factory: Arc<dyn ResourceFactory<R>>,
        parent: &CancellationToken,
        metrics: Option<Arc<MetricsRecorder>>,
    ) -> Result<Self> {
        config.validate()?;
        let token = parent.child_token();
        let metric_labels = labels(&[("pool", config.name.as_str())]);
        let inner = Arc::new(PoolInner {
            config,
            factory,
            state: Mutex::new(PoolState {
                slots: Vec::new(),
                pending: 0,
                closed: false,
            }),
            available: Notify::new(),
            counters: PoolCounters::default(),
            next_id: AtomicU64::new(1),
            token: token.clone(),
            metrics,
            metric_labels,
        });

        for _ in 0..inner.config.min_size {
            let reservation = {
                inner.lock().pending += 1;
                inner.reserve()
            };
            // Failure is already logged and counted
            let _ = inner.create(reservation, false).await;
        }

        let weak: Weak<PoolInner<R>> = Arc::downgrade(&inner);
        let health = BackgroundTask::spawn_periodic(
            format!("pool-health:{}", inner.config.name),
            inner.config.health_check_interval,
            token,
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.run_health_check().await;
                    }
                }
            },
        )?;

        let size = inner.lock().slots.len();
        tracing::info!(
            "Pool {} ready with {}/{} resources",
            inner.config.name,
            size,
            inner.config.min_size
        );

        Ok(Self {
            inner,
            health: Mutex::new(Some(health)),
        })
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Lease a resource, waiting up to `timeout` for one to become free.
    ///
    /// Returns [`RagGuardError::PoolExhausted`] when the deadline passes with
    /// the pool at `max_size`, [`RagGuardError::ResourceCreation`] when a new
    /// resource was needed and the factory failed or outlived the deadline,
    /// and
    /// [`RagGuardError::PoolClosed`] after shutdown.
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledResource<R>> {
        let started = Instant::now();
        // Too far out to represent: wait without a deadline
        let deadline = started.checked_add(timeout);
        let mut expired = false;

        loop {
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.inner.checkout()? {
                Checkout::Ready(lease) => return Ok(self.acquired(lease, started)),
                Checkout::Create => {
                    let reservation = self.inner.reserve();
                    let created = self.inner.create(reservation, true);
                    let created = match deadline {
                        Some(deadline) => tokio::time::timeout_at(deadline, created)
                            .await
                            .map_err(|_| self.creation_timed_out(started))?,
                        None => created.await,
                    };
                    if let Some(lease) = created? {
                        return Ok(self.acquired(lease, started));
                    }
                }
                Checkout::Full => {}
            }

            if expired {
                break;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = sleep_until_deadline(deadline) => expired = true,
                _ = self.inner.token.cancelled() => {
                    return Err(RagGuardError::PoolClosed(self.inner.config.name.clone()));
                }
            }
        }

        let waited = started.elapsed();
        self.inner
            .counters
            .exhaustion_count
            .fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_counter("pool.exhausted", 1.0, &self.inner.metric_labels);
        }
        tracing::warn!("Pool {} exhausted after waiting {:?}", self.name(), waited);
        Err(RagGuardError::PoolExhausted {
            pool: self.inner.config.name.clone(),
            waited,
        })
    }

    /// The factory did not deliver before the acquire deadline. The dropped
    /// creation future releases its reservation.
    fn creation_timed_out(&self, started: Instant) -> RagGuardError {
        self.inner
            .counters
            .creation_failures
            .fetch_add(1, Ordering::Relaxed);
        let waited = started.elapsed();
        tracing::warn!(
            "Pool {}: creating {} timed out after {:?}",
            self.name(),
            self.inner.factory.name(),
            waited
        );
        RagGuardError::ResourceCreation {
            pool: self.inner.config.name.clone(),
            reason: format!("timed out after {:?}", waited),
        }
    }

    /// Lease a resource with the configured `acquire_timeout`
    pub async fn acquire_default(&self) -> Result<PooledResource<R>> {
        self.acquire(self.inner.config.acquire_timeout).await
    }

    fn acquired(&self, lease: PooledResource<R>, started: Instant) -> PooledResource<R> {
        let waited = started.elapsed();
        let counters = &self.inner.counters;
        counters.acquisitions.fetch_add(1, Ordering::Relaxed);
        counters
            .total_wait_us
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_timer("pool.acquire_wait_ms", waited, &self.inner.metric_labels);
        }
        lease
    }

    /// Hand a leased resource back. `failed` marks it for removal on the
    /// next health pass instead of returning it to the idle set.
    pub fn release(&self, lease: PooledResource<R>, failed: bool) {
        if !lease.belongs_to(&Arc::downgrade(&self.inner)) {
            tracing::warn!(
                "Resource {} released to pool {} it was not leased from",
                lease.id(),
                self.name()
            );
        }
        lease.finish(failed);
    }

    /// Run one health pass now
    pub async fn run_health_check(&self) -> HealthReport {
        self.inner.run_health_check().await
    }

    pub fn get_stats(&self) -> PoolStats {
        let (total, active, idle, failed, pending) = {
            let state = self.inner.lock();
            (
                state.slots.len(),
                state.count(ResourceState::InUse),
                state.count(ResourceState::Idle),
                state.count(ResourceState::Failed),
                state.pending,
            )
        };
        let c = &self.inner.counters;
        let acquisitions = c.acquisitions.load(Ordering::Relaxed);
        let avg_wait_ms = if acquisitions > 0 {
            c.total_wait_us.load(Ordering::Relaxed) as f64 / acquisitions as f64 / 1000.0
        } else {
            0.0
        };

        PoolStats {
            name: self.inner.config.name.clone(),
            total,
            active,
            idle,
            failed,
            pending,
            min_size: self.inner.config.min_size,
            max_size: self.inner.config.max_size,
            utilization: active as f64 / self.inner.config.max_size as f64,
            exhaustion_count: c.exhaustion_count.load(Ordering::Relaxed),
            created: c.created.load(Ordering::Relaxed),
            creation_failures: c.creation_failures.load(Ordering::Relaxed),
            closed: c.closed.load(Ordering::Relaxed),
            acquisitions,
            avg_wait_ms,
        }
    }

    /// Snapshot of every resource currently owned by the pool
    pub fn resources(&self) -> Vec<ResourceInfo> {
        let now = Instant::now();
        self.inner
            .lock()
            .slots
            .iter()
            .map(|s| ResourceInfo {
                id: s.id,
                state: s.state,
                age_secs: now.saturating_duration_since(s.created_at).as_secs_f64(),
                idle_secs: now.saturating_duration_since(s.last_used_at).as_secs_f64(),
                use_count: s.use_count,
                error_count: s.error_count,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Stop health checks, wake waiters and close every pooled resource.
    /// Leases still outstanding are closed when released. Safe to call
    /// repeatedly.
    pub async fn shutdown(&self) {
        let health = match self.health.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(health) = health {
            health.shutdown().await;
        }
        self.inner.token.cancel();

        let drained: Vec<R> = {
            let mut state = self.inner.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state
                .slots
                .drain(..)
                .filter_map(|mut slot| slot.resource.take())
                .collect()
        };
        let count = drained.len();
        self.inner.close_resources(drained);
        self.inner.available.notify_waiters();
        tracing::info!("Pool {} shut down, closed {} resources", self.name(), count);
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
