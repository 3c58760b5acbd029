//! Breaker, retry and pool lease composed around one outbound call

use super::{CircuitBreaker, RetryPolicy};
use crate::error::{RagGuardError, Result};
use crate::monitor::{labels, MetricsRecorder};
use crate::pool::ConnectionPool;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Guards calls to one dependency
///
/// The breaker is consulted once per call and sees one outcome for the
/// whole retry sequence, so an open circuit rejects before any backoff is
/// paid. Local pool failures (exhaustion, shutdown) are not held against the
/// dependency.
pub struct GuardedCall {
    target: String,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl GuardedCall {
    pub fn new(target: impl Into<String>, breaker: Arc<CircuitBreaker>, retry: RetryPolicy) -> Self {
        Self {
            target: target.into(),
            breaker,
            retry,
            metrics: None,
        }
    }

    /// Record `guarded_call.duration_ms` and `guarded_call.outcome`
    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `op` behind the breaker with retries.
    ///
    /// Returns [`RagGuardError::CircuitOpen`] without calling `op` when the
    /// circuit is open.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.breaker.can_attempt() {
            tracing::debug!("{}: circuit open, call rejected", self.target);
            self.record("rejected", None);
            return Err(RagGuardError::CircuitOpen {
                name: self.breaker.name().to_string(),
                failure_count: self.breaker.failure_count(),
            });
        }

        let started = Instant::now();
        let result = self.retry.run(&self.target, op).await;
        let outcome = match &result {
            Ok(_) => {
                self.breaker.record_success();
                "success"
            }
            Err(e) if is_local_failure(e) => "failure",
            Err(_) => {
                self.breaker.record_failure();
                "failure"
            }
        };
        self.record(outcome, Some(started.elapsed()));
        result
    }

    /// Like [`GuardedCall::call`], leasing a resource from `pool` for each
    /// attempt. A resource is released as failed only when its attempt hit a
    /// transient error; rejected requests leave the session reusable.
    pub async fn call_pooled<R, T, F>(
        &self,
        pool: &ConnectionPool<R>,
        timeout: Duration,
        op: F,
    ) -> Result<T>
    where
        R: Send + 'static,
        F: for<'a> Fn(&'a R) -> BoxFuture<'a, Result<T>>,
    {
        let op = &op;
        self.call(move |_| async move {
            let lease = pool.acquire(timeout).await?;
            let result = op(&*lease).await;
            let broken = result.as_ref().is_err_and(RagGuardError::is_transient);
            pool.release(lease, broken);
            result
        })
        .await
    }

    fn record(&self, outcome: &str, elapsed: Option<Duration>) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        if let Some(elapsed) = elapsed {
            metrics.record_timer(
                "guarded_call.duration_ms",
                elapsed,
                &labels(&[("target", self.target.as_str())]),
            );
        }
        metrics.record_counter(
            "guarded_call.outcome",
            1.0,
            &labels(&[("target", self.target.as_str()), ("outcome", outcome)]),
        );
    }
}

fn is_local_failure(error: &RagGuardError) -> bool {
    matches!(
        error.root(),
        RagGuardError::PoolExhausted { .. } | RagGuardError::PoolClosed(_)
    )
}
