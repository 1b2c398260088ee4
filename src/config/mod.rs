//! # Configuration
//!
//! Typed configuration for the orchestration core. Every section has serde
//! defaults, so an empty file (or no file) yields a working setup; see
//! [`loader::ConfigManager`] for how layers are merged.

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::{DEFAULT_DEDUP_KEY_PREFIX, DEFAULT_VOLATILE_FIELDS, MAX_RETRY_ATTEMPTS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaConfig {
    pub dispatcher: DispatcherConfig,
    pub retry: RetryConfig,
    pub dedup: DedupConfig,
    pub database: DatabaseConfig,
}

/// Worker pool behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub worker_count: usize,
    /// Idle wait between claim attempts when no work was signalled
    pub poll_interval_ms: u64,
    pub handler_timeout_ms: u64,
    /// Running executions older than this are treated as timed out
    pub stalled_execution_timeout_seconds: u64,
    pub reaper_interval_seconds: u64,
    pub worker_id_prefix: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            poll_interval_ms: 1_000,
            handler_timeout_ms: 30_000,
            stalled_execution_timeout_seconds: 300, // 5 minutes
            reaper_interval_seconds: 60,
            worker_id_prefix: "area-worker".to_string(),
        }
    }
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn stalled_execution_timeout(&self) -> Duration {
        Duration::from_secs(self.stalled_execution_timeout_seconds)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_seconds)
    }
}

/// Retry and backoff policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Executions are not retried once this long has passed since creation
    pub max_total_elapsed_seconds: u64,
    /// Symmetric jitter applied to computed delays (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 5_000,
            multiplier: 2.0,
            max_delay_ms: 300_000,            // 5 minutes
            max_total_elapsed_seconds: 3_600, // 1 hour
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn max_total_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_total_elapsed_seconds)
    }
}

/// Deduplication and content hashing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub key_prefix: String,
    /// Payload fields dropped before hashing, at any depth
    pub volatile_fields: Vec<String>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_DEDUP_KEY_PREFIX.to_string(),
            volatile_fields: DEFAULT_VOLATILE_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// PostgreSQL connection settings; only read when the Postgres store is used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    /// Apply embedded schema migrations when the core connects
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_seconds: 5,
            run_migrations: true,
        }
    }
}

impl AreaConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.dispatcher.worker_count == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatcher.worker_count",
                "0",
                "worker count must be greater than 0",
            ));
        }

        if self.dispatcher.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatcher.poll_interval_ms",
                "0",
                "poll interval must be greater than 0",
            ));
        }

        if self.dispatcher.handler_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatcher.handler_timeout_ms",
                "0",
                "handler timeout must be greater than 0",
            ));
        }

        if self
            .dispatcher
            .stalled_execution_timeout_seconds
            .saturating_mul(1_000)
            <= self.dispatcher.handler_timeout_ms
        {
            return Err(ConfigurationError::invalid_value(
                "dispatcher.stalled_execution_timeout_seconds",
                self.dispatcher.stalled_execution_timeout_seconds.to_string(),
                "stall timeout must exceed the handler timeout",
            ));
        }

        if self.dispatcher.worker_id_prefix.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "dispatcher.worker_id_prefix",
                "dispatcher configuration",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                "0",
                "at least one attempt is required",
            ));
        }

        if self.retry.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                self.retry.max_attempts.to_string(),
                format!("at most {MAX_RETRY_ATTEMPTS} attempts are allowed"),
            ));
        }

        if self.retry.multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "retry.multiplier",
                self.retry.multiplier.to_string(),
                "multiplier must be at least 1.0",
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigurationError::invalid_value(
                "retry.jitter_factor",
                self.retry.jitter_factor.to_string(),
                "jitter factor must be between 0.0 and 1.0",
            ));
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.max_delay_ms",
                self.retry.max_delay_ms.to_string(),
                "max delay must not be lower than the base delay",
            ));
        }

        if self.dedup.key_prefix.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "dedup.key_prefix",
                "dedup configuration",
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "pool size must be greater than 0",
            ));
        }

        Ok(())
    }
}
