//! Circuit breaker

use crate::config::BreakerConfig;
use crate::error::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected until the recovery timeout passes
    Open,
    /// Trial calls are let through; the next outcome decides
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

/// Serializable view of a breaker
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
    pub last_failure_secs_ago: Option<f64>,
    pub rejected: u64,
}

/// Stops calls to a failing dependency until it has had time to recover
///
/// Callers consult [`CircuitBreaker::can_attempt`] before each call and
/// report the outcome with [`CircuitBreaker::record_success`] or
/// [`CircuitBreaker::record_failure`].
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
    rejected: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
            rejected: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Whether a call may be issued now.
    ///
    /// An open circuit moves to half-open once `recovery_timeout` has passed
    /// since the last failure.
    pub fn can_attempt(&self) -> bool {
        let mut state = self.lock();
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovered = state
                    .last_failure_at
                    .map_or(true, |at| at.elapsed() > self.config.recovery_timeout);
                if recovered {
                    state.state = CircuitState::HalfOpen;
                    tracing::info!("Circuit {} half-open, allowing trial call", self.name);
                    true
                } else {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.state != CircuitState::Closed {
            tracing::info!("Circuit {} closed after successful call", self.name);
        }
        state.state = CircuitState::Closed;
        state.failure_count = 0;
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure_at = Some(Instant::now());

        match state.state {
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                tracing::warn!("Circuit {} re-opened: trial call failed", self.name);
            }
            CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
                state.state = CircuitState::Open;
                tracing::warn!(
                    "Circuit {} opened after {} consecutive failures",
                    self.name,
                    state.failure_count
                );
            }
            _ => {}
        }
    }

    /// Current state without triggering the open to half-open transition
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Calls turned away while open
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Force the breaker back to closed
    pub fn reset(&self) {
        let mut state = self.lock();
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.last_failure_at = None;
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_secs: self.config.recovery_timeout.as_secs_f64(),
            last_failure_secs_ago: state.last_failure_at.map(|at| at.elapsed().as_secs_f64()),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
