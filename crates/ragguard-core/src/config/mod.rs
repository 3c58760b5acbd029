//! Configuration management

mod components;
pub mod secs;

pub use components::{
    BreakerConfig, CacheConfig, EvictionPolicy, MonitorConfig, PoolConfig, RetryConfig,
};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Connection pools keyed by logical resource name
    #[serde(default)]
    pub pools: BTreeMap<String, PoolConfig>,

    /// Caches keyed by logical name
    #[serde(default)]
    pub caches: BTreeMap<String, CacheConfig>,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    /// LLM service configuration for external inference
    #[serde(default)]
    pub llm_service: LLMServiceConfig,
}

/// LLM service configuration for external inference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMServiceConfig {
    /// Base URL of the LLM service for chat/completions
    pub url: String,

    /// Model name for chat completions
    #[serde(default = "default_chat_model")]
    pub model: String,

    /// API key (optional, for authenticated services)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Sampling temperature sent with every completion
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LLMServiceConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("RAGGUARD_LLM_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            model: default_chat_model(),
            api_key: std::env::var("RAGGUARD_LLM_API_KEY").ok(),
            timeout_secs: default_timeout(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_chat_model() -> String {
    std::env::var("RAGGUARD_LLM_MODEL")
        .unwrap_or_else(|_| "meta-llama/Llama-3.1-8B-Instruct".to_string())
}

fn default_timeout() -> u64 {
    30
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    512
}

impl Config {
    /// Load config from `RAGGUARD_CONFIG` or the default path
    pub fn load() -> Result<Self> {
        let path = std::env::var("RAGGUARD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());
        Self::load_from(&path)
    }

    /// Load config from a file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_yaml(&content)?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Config::default()
        };
        Ok(config)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(content)?;
        // Map keys are the source of truth for pool names
        for (name, pool) in config.pools.iter_mut() {
            pool.name = name.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Save config to the given path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::CONFIG_DIR_NAME)
            .join("config.yml")
    }

    /// Validate every component section
    pub fn validate(&self) -> Result<()> {
        for pool in self.pools.values() {
            pool.validate()?;
        }
        for cache in self.caches.values() {
            cache.validate()?;
        }
        self.breaker.validate()?;
        self.retry.validate()?;
        self.monitor.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_from(&temp_dir.path().join("absent.yml")).unwrap();

        assert!(config.pools.is_empty());
        assert_eq!(config.breaker.failure_threshold, 5);
    }

    #[test]
    fn test_yaml_roundtrip_through_disk() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.yml");

        let yaml = r#"
pools:
  vector_db:
    min_size: 1
    max_size: 4
    acquire_timeout: 0.5
caches:
  answers:
    max_entries: 50
    eviction_policy: lru
breaker:
  failure_threshold: 3
  recovery_timeout: 1.5
monitor:
  alert_rules:
    - name: slow_llm
      metric_name: guarded_call.duration_ms
      threshold: 2000
      comparator: ">"
      sustain_duration: 60
"#;
        let config = Config::from_yaml(yaml).unwrap();
        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();

        let pool = &loaded.pools["vector_db"];
        assert_eq!(pool.name, "vector_db");
        assert_eq!(pool.max_size, 4);
        assert_eq!(pool.acquire_timeout, Duration::from_millis(500));
        assert_eq!(loaded.caches["answers"].max_entries, 50);
        assert_eq!(loaded.breaker.recovery_timeout, Duration::from_millis(1500));
        assert_eq!(loaded.monitor.alert_rules.len(), 1);
        assert_eq!(loaded.monitor.alert_rules[0].name, "slow_llm");
    }

    #[test]
    fn test_invalid_section_is_rejected() {
        let yaml = "pools:\n  llm:\n    min_size: 8\n    max_size: 2\n";
        assert!(Config::from_yaml(yaml).is_err());
    }
}
