//! RagGuard Core Library
//!
//! Resilience and performance substrate for RAG query paths: every call to
//! a vector store or LLM endpoint goes through it.
//!
//! # Features
//! - Async resource pool with health checks and bounded waits
//! - TTL cache with LRU/LFU eviction, memory budget and request coalescing
//! - Circuit breaker with exponential-backoff retry
//! - Time-series metrics with hysteresis-based alerting

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod monitor;
pub mod pool;
pub mod registry;
pub mod resilience;
pub mod runtime;

pub use cache::{CacheEngine, CacheStats, EstimateSize};
pub use config::{
    BreakerConfig, CacheConfig, Config, EvictionPolicy, LLMServiceConfig, MonitorConfig,
    PoolConfig, RetryConfig,
};
pub use context::AppContext;
pub use error::{Error, RagGuardError, Result};
pub use llm::{ChatClient, ChatMessage, HttpSessionFactory, LLMClient};
pub use monitor::{
    labels, AlertEvent, AlertLevel, AlertRule, Comparator, Dashboard, Labels, MetricSummary,
    MetricsRecorder, PerformanceMonitor,
};
pub use pool::{ConnectionPool, PoolStats, PooledResource, ResourceFactory};
pub use registry::{CacheRegistry, PoolRegistry};
pub use resilience::{CircuitBreaker, CircuitState, GuardedCall, RetryPolicy};
pub use runtime::BackgroundTask;

/// Default config directory name
pub const CONFIG_DIR_NAME: &str = "ragguard";
