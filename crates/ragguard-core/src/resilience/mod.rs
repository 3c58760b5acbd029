//! Failure handling for outbound calls
//!
//! - [`CircuitBreaker`]: stops calling a dependency after repeated failures
//! - [`RetryPolicy`]: exponential backoff with jitter for transient errors
//! - [`GuardedCall`]: breaker around retry around a pooled resource

mod breaker;
mod guard;
mod retry;

pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use guard::GuardedCall;
pub use retry::RetryPolicy;
