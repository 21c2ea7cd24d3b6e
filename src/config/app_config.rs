use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::queue::RetryPolicy;
use crate::domain::DomainError;
use crate::infrastructure::cache::ResponseCacheConfig;
use crate::infrastructure::services::CoordinatorConfig;
use crate::infrastructure::storage::StorageConfig;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub cache: CacheSettings,
    pub queue: QueueSettings,
    pub coordinator: CoordinatorSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub max_attempts: u32,
    pub unknown_error_max_attempts: u32,
    pub rate_limit_backoff_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    pub live_call_timeout_secs: u64,
    pub deduplicate_in_flight: bool,
    pub drain_on_reconnect: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// `memory` or `file`
    pub backend: String,
    /// Directory used by the file backend
    pub path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            max_entries: 100,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            unknown_error_max_attempts: 2,
            rate_limit_backoff_secs: 60,
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            live_call_timeout_secs: 30,
            deduplicate_in_flight: true,
            drain_on_reconnect: true,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            path: "./data".to_string(),
        }
    }
}

impl CacheSettings {
    pub fn cache_config(&self) -> ResponseCacheConfig {
        ResponseCacheConfig::default()
            .with_ttl(chrono::Duration::seconds(clamp_secs(self.ttl_secs)))
            .with_max_entries(self.max_entries)
    }
}

impl QueueSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_unknown_error_max_attempts(self.unknown_error_max_attempts)
            .with_rate_limit_backoff(chrono::Duration::seconds(clamp_secs(
                self.rate_limit_backoff_secs,
            )))
    }
}

impl CoordinatorSettings {
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::default()
            .with_live_call_timeout(Duration::from_secs(self.live_call_timeout_secs))
            .with_deduplication(self.deduplicate_in_flight)
            .with_drain_on_reconnect(self.drain_on_reconnect)
    }
}

impl StorageSettings {
    pub fn storage_config(&self) -> Result<StorageConfig, DomainError> {
        StorageConfig::from_parts(&self.backend, &self.path)
    }
}

/// Longest TTL or back-off accepted, ten years
const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn clamp_secs(secs: u64) -> i64 {
    secs.min(MAX_DURATION_SECS) as i64
}

impl AppConfig {
    /// Loads `.env`, `config/default`, `config/local` and `APP__*` variables
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        Self::load_from(".")
    }

    /// Loads configuration files relative to `base`
    pub fn load_from(base: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        let base = base.as_ref();
        let default = base.join("config").join("default");
        let local = base.join("config").join("local");

        let config = config::Config::builder()
            .add_source(config::File::with_name(&default.to_string_lossy()).required(false))
            .add_source(config::File::with_name(&local.to_string_lossy()).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config
            .validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;

        Ok(config)
    }

    /// Rejects values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.cache.max_entries == 0 {
            return Err(DomainError::configuration("cache.max_entries must be at least 1"));
        }

        if self.cache.ttl_secs == 0 {
            return Err(DomainError::configuration("cache.ttl_secs must be positive"));
        }

        if self.queue.max_attempts == 0 || self.queue.unknown_error_max_attempts == 0 {
            return Err(DomainError::configuration("queue attempt ceilings must be at least 1"));
        }

        if self.coordinator.live_call_timeout_secs == 0 {
            return Err(DomainError::configuration(
                "coordinator.live_call_timeout_secs must be positive",
            ));
        }

        self.storage.storage_config()?;
        Ok(())
    }
}
