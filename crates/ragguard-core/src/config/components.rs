//! Typed per-component configuration
//!
//! Every struct here is validated when the component it configures is built.
//! Durations are written in YAML as fractional seconds.

use crate::error::{RagGuardError, Result};
use crate::monitor::AlertRule;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection pool sizing and lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Logical resource name, used in logs, metrics labels and errors
    #[serde(default = "default_pool_name")]
    pub name: String,

    /// Resources created eagerly and kept alive by the health pass
    #[serde(default = "default_min_size")]
    pub min_size: usize,

    /// Hard cap on resources owned by the pool
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Idle resources older than this are retired while above `min_size`
    #[serde(default = "default_max_idle", with = "super::secs")]
    pub max_idle_duration: Duration,

    /// Resources older than this are retired regardless of use
    #[serde(default = "default_max_age", with = "super::secs")]
    pub max_resource_age: Duration,

    #[serde(default = "default_health_interval", with = "super::secs")]
    pub health_check_interval: Duration,

    /// Timeout used by `acquire_default`
    #[serde(default = "default_acquire_timeout", with = "super::secs")]
    pub acquire_timeout: Duration,
}

fn default_pool_name() -> String {
    "default".to_string()
}

fn default_min_size() -> usize {
    2
}

fn default_max_size() -> usize {
    10
}

fn default_max_idle() -> Duration {
    Duration::from_secs(300)
}

fn default_max_age() -> Duration {
    Duration::from_secs(3600)
}

fn default_health_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: default_pool_name(),
            min_size: default_min_size(),
            max_size: default_max_size(),
            max_idle_duration: default_max_idle(),
            max_resource_age: default_max_age(),
            health_check_interval: default_health_interval(),
            acquire_timeout: default_acquire_timeout(),
        }
    }
}

impl PoolConfig {
    /// Create a config with the given name and default settings
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_sizes(mut self, min_size: usize, max_size: usize) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_max_idle_duration(mut self, duration: Duration) -> Self {
        self.max_idle_duration = duration;
        self
    }

    pub fn with_max_resource_age(mut self, age: Duration) -> Self {
        self.max_resource_age = age;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(config_error("pool name must not be empty"));
        }
        if self.max_size == 0 {
            return Err(config_error(format!("pool '{}': max_size must be > 0", self.name)));
        }
        if self.min_size > self.max_size {
            return Err(config_error(format!(
                "pool '{}': min_size ({}) exceeds max_size ({})",
                self.name, self.min_size, self.max_size
            )));
        }
        if self.health_check_interval.is_zero() {
            return Err(config_error(format!(
                "pool '{}': health_check_interval must be > 0",
                self.name
            )));
        }
        Ok(())
    }
}

/// Which entry to drop when the cache is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently used
    #[default]
    Lru,
    /// Least frequently used
    Lfu,
}

/// Cache capacity, expiry and eviction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// TTL applied when `set` is called without one; `null` disables expiry
    #[serde(default = "default_ttl", with = "super::secs::option")]
    pub default_ttl: Option<Duration>,

    /// Period of the background expiry sweep
    #[serde(default = "default_cleanup_interval", with = "super::secs")]
    pub cleanup_interval: Duration,

    #[serde(default)]
    pub eviction_policy: EvictionPolicy,

    /// Upper bound on the estimated size of all cached values
    #[serde(default = "default_max_memory")]
    pub max_memory_bytes: usize,
}

fn default_max_entries() -> usize {
    1000
}

fn default_ttl() -> Option<Duration> {
    Some(Duration::from_secs(3600))
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_max_memory() -> usize {
    100 * 1024 * 1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            default_ttl: default_ttl(),
            cleanup_interval: default_cleanup_interval(),
            eviction_policy: EvictionPolicy::default(),
            max_memory_bytes: default_max_memory(),
        }
    }
}

impl CacheConfig {
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn with_max_memory_bytes(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(config_error("cache max_entries must be > 0"));
        }
        if self.max_memory_bytes == 0 {
            return Err(config_error("cache max_memory_bytes must be > 0"));
        }
        if self.cleanup_interval.is_zero() {
            return Err(config_error("cache cleanup_interval must be > 0"));
        }
        Ok(())
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time an open circuit waits before allowing a trial call
    #[serde(default = "default_recovery_timeout", with = "super::secs")]
    pub recovery_timeout: Duration,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout: default_recovery_timeout(),
        }
    }
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(config_error("breaker failure_threshold must be > 0"));
        }
        Ok(())
    }
}

/// Retry with exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay", with = "super::secs")]
    pub base_delay: Duration,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_max_delay", with = "super::secs")]
    pub max_delay: Duration,

    /// Upper bound of the uniform random jitter added to each delay
    #[serde(default = "default_jitter", with = "super::secs")]
    pub jitter: Duration,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_jitter() -> Duration {
    Duration::from_millis(100)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            backoff_factor: default_backoff_factor(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(config_error("retry max_attempts must be > 0"));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(config_error(format!(
                "retry backoff_factor must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        if self.max_delay < self.base_delay {
            return Err(config_error("retry max_delay must be >= base_delay"));
        }
        Ok(())
    }
}

/// Metrics retention and alert evaluation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Points kept per (metric, labels) series
    #[serde(default = "default_max_points")]
    pub max_points_per_series: usize,

    /// Points older than this are dropped
    #[serde(default = "default_retention", with = "super::secs")]
    pub retention: Duration,

    #[serde(default = "default_evaluation_interval", with = "super::secs")]
    pub evaluation_interval: Duration,

    /// Resolved and active alert events kept in history
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    #[serde(default)]
    pub alert_rules: Vec<AlertRule>,
}

fn default_max_points() -> usize {
    10_000
}

fn default_retention() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_evaluation_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_max_history() -> usize {
    1000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_points_per_series: default_max_points(),
            retention: default_retention(),
            evaluation_interval: default_evaluation_interval(),
            max_history: default_max_history(),
            alert_rules: Vec::new(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_points_per_series == 0 {
            return Err(config_error("monitor max_points_per_series must be > 0"));
        }
        if self.retention.is_zero() || self.evaluation_interval.is_zero() {
            return Err(config_error(
                "monitor retention and evaluation_interval must be > 0",
            ));
        }
        if self.max_history == 0 {
            return Err(config_error("monitor max_history must be > 0"));
        }
        for rule in &self.alert_rules {
            rule.validate()?;
        }
        Ok(())
    }
}

fn config_error(msg: impl Into<String>) -> RagGuardError {
    RagGuardError::Config(msg.into())
}
