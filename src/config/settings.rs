//! # Configuration Settings
//!
//! Defines the configuration structure for the strongroom secrets subsystem.

use crate::errors::{Result, StrongroomError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::secrets::RetryPolicy;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,

    /// Catalog storage configuration
    #[validate(nested)]
    pub storage: StorageConfig,

    /// Secrets backend behaviour
    #[validate(nested)]
    pub secrets: SecretsConfig,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(StrongroomError::from)?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        if self.storage.backend == StorageBackend::Sqlite && !self.storage.url.starts_with("sqlite:") {
            return Err(StrongroomError::validation_field(
                "Storage URL must start with 'sqlite:'",
                "storage.url",
            ));
        }

        if self.secrets.retry_initial_backoff_ms > self.secrets.retry_max_backoff_ms {
            return Err(StrongroomError::validation_field(
                "Initial retry backoff cannot exceed the maximum backoff",
                "secrets.retry_initial_backoff_ms",
            ));
        }

        Ok(())
    }
}

/// Observability configuration for logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Metrics server port (0 = disabled)
    pub metrics_port: u16,

    /// Service name attached to metrics
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            metrics_port: 9090,
            service_name: "strongroom".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }
}

/// Document store implementation backing the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

/// Catalog storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Database connection URL
    #[validate(length(min = 1, message = "Storage URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[validate(range(min = 0, max = 50, message = "Min connections must be between 0 and 50"))]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[validate(range(min = 1, max = 60, message = "Connect timeout must be between 1 and 60 seconds"))]
    pub connect_timeout_seconds: u64,

    /// Idle timeout in seconds (0 = no timeout)
    pub idle_timeout_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            url: "sqlite://./data/strongroom.db".to_string(),
            max_connections: 10,
            min_connections: 0,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
        }
    }
}

impl StorageConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get idle timeout as Duration (None if 0)
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// Secrets backend behaviour
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SecretsConfig {
    /// Upper bound on a single backend call, in seconds
    #[validate(range(min = 1, max = 300, message = "Request timeout must be between 1 and 300 seconds"))]
    pub request_timeout_seconds: u64,

    /// Lifetime of minted agent credentials, in seconds
    #[validate(range(min = 60, max = 86400, message = "Token TTL must be between 60 and 86400 seconds"))]
    pub token_ttl_seconds: u64,

    /// Attempts for idempotent backend reads
    #[validate(range(min = 1, max = 10, message = "Retry attempts must be between 1 and 10"))]
    pub retry_max_attempts: u32,

    pub retry_initial_backoff_ms: u64,

    pub retry_max_backoff_ms: u64,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
            token_ttl_seconds: 600,
            retry_max_attempts: 3,
            retry_initial_backoff_ms: 100,
            retry_max_backoff_ms: 2000,
        }
    }
}

impl SecretsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            initial_backoff: Duration::from_millis(self.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry_max_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_storage_config_timeouts() {
        let config = StorageConfig {
            connect_timeout_seconds: 15,
            idle_timeout_seconds: 300,
            ..Default::default()
        };
        assert_eq!(config.connect_timeout(), Duration::from_secs(15));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(300)));

        let no_idle = StorageConfig { idle_timeout_seconds: 0, ..Default::default() };
        assert_eq!(no_idle.idle_timeout(), None);
    }

    #[test]
    fn test_in_memory_detection() {
        let config = StorageConfig { url: "sqlite::memory:".to_string(), ..Default::default() };
        assert!(config.is_in_memory());
        assert!(!StorageConfig::default().is_in_memory());
    }

    #[test]
    fn test_secrets_config_durations() {
        let config = SecretsConfig::default();
        assert_eq!(config.token_ttl(), Duration::from_secs(600));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));

        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.initial_backoff, Duration::from_millis(100));
    }

    #[test]
    fn test_observability_config_metrics_address() {
        let config = ObservabilityConfig { metrics_port: 9090, ..Default::default() };
        assert_eq!(config.metrics_bind_address(), Some("0.0.0.0:9090".to_string()));

        let disabled = ObservabilityConfig { metrics_port: 0, ..Default::default() };
        assert_eq!(disabled.metrics_bind_address(), None);
    }

    #[test]
    fn test_config_validation_errors() {
        let mut config = AppConfig::default();
        config.storage.url = "postgresql://localhost/db".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.secrets.token_ttl_seconds = 5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.storage.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.secrets.retry_initial_backoff_ms = 5000;
        assert!(config.validate().is_err());
    }
}
