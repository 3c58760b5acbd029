//! Periodic background jobs bound to a cancellation token
//!
//! Pool health passes, cache expiry sweeps and alert evaluation all run as a
//! [`BackgroundTask`]. Each task observes one `CancellationToken`; cancelling
//! the application's root token stops every loop derived from it.

use crate::error::{RagGuardError, Result};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Handle to a spawned periodic job
pub struct BackgroundTask {
    name: String,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundTask {
    /// Spawn `job` every `interval` until `token` is cancelled.
    ///
    /// The first run happens one full interval after spawning. A job that is
    /// still running when the token fires is dropped at its next await point.
    pub fn spawn_periodic<F, Fut>(
        name: impl Into<String>,
        interval: Duration,
        token: CancellationToken,
        mut job: F,
    ) -> Result<Self>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        if interval.is_zero() {
            return Err(RagGuardError::Config(format!(
                "background task '{}' needs a non-zero interval",
                name
            )));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            RagGuardError::Config(format!(
                "background task '{}' must be started inside a tokio runtime",
                name
            ))
        })?;

        let loop_token = token.clone();
        let loop_name = name.clone();
        let handle = runtime.spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    biased;
                    _ = loop_token.cancelled() => break,
                    _ = job() => {}
                }
            }
            tracing::debug!("Background task '{}' stopped", loop_name);
        });

        Ok(Self {
            name,
            token,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the loop is still scheduled
    pub fn is_running(&self) -> bool {
        match self.handle.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|h| !h.is_finished()),
            Err(_) => false,
        }
    }

    /// Signal the loop to stop without waiting for it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel the loop and wait for it to exit. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!("Background task '{}' panicked: {}", self.name, e);
                }
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_interval_until_cancelled() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let task = BackgroundTask::spawn_periodic(
            "tick",
            Duration::from_secs(1),
            CancellationToken::new(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        task.shutdown().await;
        assert!(!task.is_running());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        // Second shutdown is a no-op
        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_token_stops_child_task() {
        let root = CancellationToken::new();
        let task = BackgroundTask::spawn_periodic(
            "child",
            Duration::from_millis(100),
            root.child_token(),
            || async {},
        )
        .unwrap();

        root.cancel();
        task.shutdown().await;
        assert!(!task.is_running());
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        let result = BackgroundTask::spawn_periodic(
            "bad",
            Duration::ZERO,
            CancellationToken::new(),
            || async {},
        );
        assert!(result.is_err());
    }
}
