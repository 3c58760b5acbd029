//! Leased pool resources

use super::PoolInner;
use std::ops::{Deref, DerefMut};
use std::sync::Weak;
use std::time::Duration;
use tokio::time::Instant;

/// A resource checked out of a [`ConnectionPool`](super::ConnectionPool)
///
/// Derefs to the underlying resource. Hand it back with
/// [`ConnectionPool::release`](super::ConnectionPool::release); a lease that
/// is dropped without being released is returned to the pool as failed.
pub struct PooledResource<R: Send + 'static> {
    id: u64,
    resource: Option<R>,
    created_at: Instant,
    acquired_at: Instant,
    use_count: u64,
    pool: Weak<PoolInner<R>>,
}

impl<R: Send + 'static> PooledResource<R> {
    pub(super) fn new(
        id: u64,
        resource: R,
        created_at: Instant,
        use_count: u64,
        pool: Weak<PoolInner<R>>,
    ) -> Self {
        Self {
            id,
            resource: Some(resource),
            created_at,
            acquired_at: Instant::now(),
            use_count,
            pool,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time since the underlying resource was created
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since this lease was handed out
    pub fn time_in_use(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Number of times the resource has been leased, including this one
    pub fn use_count(&self) -> u64 {
        self.use_count
    }

    pub(super) fn belongs_to(&self, pool: &Weak<PoolInner<R>>) -> bool {
        Weak::ptr_eq(&self.pool, pool)
    }

    /// Give the resource back to its pool
    pub(super) fn finish(mut self, failed: bool) {
        self.check_in(failed);
    }

    fn check_in(&mut self, failed: bool) {
        let Some(resource) = self.resource.take() else {
            return;
        };
        match self.pool.upgrade() {
            Some(pool) => pool.check_in(self.id, resource, failed),
            None => drop(resource),
        }
    }
}

impl<R: Send + 'static> Deref for PooledResource<R> {
    type Target = R;

    fn deref(&self) -> &Self::Target {
        self.resource
            .as_ref()
            .expect("BUG: PooledResource used after release")
    }
}

impl<R: Send + 'static> DerefMut for PooledResource<R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource
            .as_mut()
            .expect("BUG: PooledResource used after release")
    }
}

impl<R: Send + 'static> Drop for PooledResource<R> {
    fn drop(&mut self) {
        if self.resource.is_some() {
            tracing::warn!(
                "Pooled resource {} dropped without release; marking it failed",
                self.id
            );
            self.check_in(true);
        }
    }
}

impl<R: Send + 'static> std::fmt::Debug for PooledResource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledResource")
            .field("id", &self.id)
            .field("use_count", &self.use_count)
            .field("released", &self.resource.is_none())
            .finish()
    }
}
