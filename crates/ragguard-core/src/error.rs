//! Error types for ragguard

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using RagGuardError
pub type Result<T> = std::result::Result<T, RagGuardError>;

/// Error type alias for convenience
pub type Error = RagGuardError;

/// Exit codes for CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const INVALID_INPUT: i32 = 3;
    pub const UNAVAILABLE: i32 = 4;
}

/// Fallback text returned to end users when a dependency is unavailable
pub const SERVICE_UNAVAILABLE_MESSAGE: &str =
    "The service is temporarily unavailable. Please try again in a moment.";

/// Fallback text returned to end users when every pooled connection is busy
pub const SERVICE_BUSY_MESSAGE: &str =
    "The service is busy handling other requests. Please try again shortly.";

/// Main error type for ragguard
#[derive(Debug, Error)]
pub enum RagGuardError {
    #[error("Pool '{pool}' exhausted: no resource available after {waited:?}")]
    PoolExhausted { pool: String, waited: Duration },

    #[error("Pool '{0}' is shut down")]
    PoolClosed(String),

    #[error("Pool '{pool}' failed to create resource: {reason}")]
    ResourceCreation { pool: String, reason: String },

    #[error("Circuit '{name}' is open ({failure_count} consecutive failures)")]
    CircuitOpen { name: String, failure_count: u32 },

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<RagGuardError>,
    },

    #[error("{0}")]
    Coalesced(Arc<RagGuardError>),

    #[error("Metric not found: {0}")]
    MetricNotFound(String),

    #[error("No data for metric '{metric}' in the last {window:?}")]
    NoData { metric: String, window: Duration },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("External service error: {0}")]
    ExternalError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RagGuardError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.root() {
            Self::Config(_) | Self::InvalidInput(_) => exit_codes::INVALID_INPUT,
            Self::PoolExhausted { .. } | Self::CircuitOpen { .. } | Self::PoolClosed(_) => {
                exit_codes::UNAVAILABLE
            }
            _ => exit_codes::GENERAL_ERROR,
        }
    }

    /// Unwrap coalescing and retry wrappers down to the originating error
    pub fn root(&self) -> &RagGuardError {
        match self {
            Self::Coalesced(inner) => inner.root(),
            Self::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// Pool exhaustion is not: the caller already waited the full acquire
    /// timeout and gets the "busy" outcome instead.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::CircuitOpen { .. }
            | Self::PoolExhausted { .. }
            | Self::PoolClosed(_)
            | Self::Config(_)
            | Self::InvalidInput(_)
            | Self::MetricNotFound(_)
            | Self::NoData { .. }
            | Self::Serialization(_)
            | Self::Yaml(_)
            | Self::RetriesExhausted { .. } => false,
            Self::Coalesced(inner) => inner.is_transient(),
            _ => true,
        }
    }

    /// True when the call was never attempted because the circuit was open
    pub fn is_circuit_open(&self) -> bool {
        matches!(self.root(), Self::CircuitOpen { .. })
    }

    /// True when no pooled resource could be obtained in time
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self.root(), Self::PoolExhausted { .. })
    }

    /// True when every retry attempt failed
    pub fn is_retries_exhausted(&self) -> bool {
        match self {
            Self::RetriesExhausted { .. } => true,
            Self::Coalesced(inner) => inner.is_retries_exhausted(),
            _ => false,
        }
    }

    /// User-facing fallback text for caller-visible failures
    pub fn user_message(&self) -> String {
        match self.root() {
            Self::CircuitOpen { .. } | Self::PoolClosed(_) => {
                SERVICE_UNAVAILABLE_MESSAGE.to_string()
            }
            Self::PoolExhausted { .. } => SERVICE_BUSY_MESSAGE.to_string(),
            _ if self.is_retries_exhausted() => SERVICE_UNAVAILABLE_MESSAGE.to_string(),
            other => format!("Request failed: {}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_unwraps_wrappers() {
        let err = RagGuardError::Coalesced(Arc::new(RagGuardError::RetriesExhausted {
            attempts: 3,
            last: Box::new(RagGuardError::ExternalError("boom".to_string())),
        }));

        assert!(matches!(err.root(), RagGuardError::ExternalError(_)));
        assert!(err.is_retries_exhausted());
        assert!(!err.is_circuit_open());
    }

    #[test]
    fn test_caller_visible_kinds_are_distinct() {
        let open = RagGuardError::CircuitOpen {
            name: "llm".to_string(),
            failure_count: 5,
        };
        let exhausted = RagGuardError::PoolExhausted {
            pool: "llm".to_string(),
            waited: Duration::from_millis(100),
        };

        assert!(open.is_circuit_open() && !open.is_pool_exhausted());
        assert!(exhausted.is_pool_exhausted() && !exhausted.is_circuit_open());
        assert_eq!(open.user_message(), SERVICE_UNAVAILABLE_MESSAGE);
        assert_eq!(exhausted.user_message(), SERVICE_BUSY_MESSAGE);
        assert_eq!(open.exit_code(), exit_codes::UNAVAILABLE);
    }

    #[test]
    fn test_transient_classification() {
        assert!(RagGuardError::ExternalError("503".to_string()).is_transient());
        assert!(!RagGuardError::Config("bad".to_string()).is_transient());
        assert!(!RagGuardError::CircuitOpen {
            name: "x".to_string(),
            failure_count: 1
        }
        .is_transient());
        assert!(!RagGuardError::PoolExhausted {
            pool: "x".to_string(),
            waited: Duration::from_secs(1)
        }
        .is_transient());
        assert!(RagGuardError::ResourceCreation {
            pool: "x".to_string(),
            reason: "refused".to_string()
        }
        .is_transient());
    }
}
