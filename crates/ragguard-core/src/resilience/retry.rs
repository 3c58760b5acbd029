//! Retry with exponential backoff and jitter

use crate::config::RetryConfig;
use crate::error::{RagGuardError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retries transient failures with exponentially growing delays
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay after failed attempt `attempt` (0-based):
    /// `base_delay * backoff_factor^attempt` plus uniform jitter, capped at
    /// `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let backoff =
            self.config.base_delay.as_secs_f64() * self.config.backoff_factor.powi(exponent);
        let jitter = if self.config.jitter.is_zero() {
            0.0
        } else {
            rand::thread_rng().gen_range(0.0..=self.config.jitter.as_secs_f64())
        };
        let secs = (backoff + jitter).min(self.config.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(secs).unwrap_or(self.config.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or
    /// `max_attempts` is reached.
    ///
    /// `op` receives the 0-based attempt number. Exhaustion returns
    /// [`RagGuardError::RetriesExhausted`] wrapping the last error.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };
            attempt += 1;

            if attempt >= self.config.max_attempts {
                tracing::warn!("{}: giving up after {} attempts: {}", label, attempt, error);
                return Err(RagGuardError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.delay_for(attempt - 1);
            tracing::warn!(
                "{}: attempt {}/{} failed: {}; retrying in {:?}",
                label,
                attempt,
                self.config.max_attempts,
                error,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            RetryConfig::new(max_attempts, Duration::from_secs(1)).with_jitter(Duration::ZERO),
        )
        .unwrap()
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::new(
            RetryConfig::new(10, Duration::from_secs(1))
                .with_max_delay(Duration::from_secs(5))
                .with_jitter(Duration::ZERO),
        )
        .unwrap();

        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(5));
        assert_eq!(policy.delay_for(400), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::new(
            RetryConfig::new(3, Duration::from_millis(100)).with_jitter(Duration::from_millis(50)),
        )
        .unwrap();
        for _ in 0..100 {
            let delay = policy.delay_for(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = &AtomicU32::new(0);
        let started = Instant::now();

        let result = policy(3)
            .run("test", move |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RagGuardError::ExternalError("flaky".to_string()))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let err = policy(2)
            .run("test", |attempt| async move {
                Err::<(), _>(RagGuardError::ExternalError(format!("attempt {}", attempt)))
            })
            .await
            .unwrap_err();

        match err {
            RagGuardError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert_eq!(last.to_string(), "External service error: attempt 1");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_non_transient_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let err = policy(5)
            .run("test", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RagGuardError::InvalidInput("bad prompt".to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RagGuardError::InvalidInput(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
