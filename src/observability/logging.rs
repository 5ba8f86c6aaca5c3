//! # Structured Logging
//!
//! Subscriber setup and span macros for secrets operations. Secret values and
//! backend tokens are never recorded as span fields; use the URI, revision
//! and model uuid to correlate.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::errors::{Result, StrongroomError};

/// Create a tracing span for a secrets operation.
///
/// ```rust,ignore
/// let span = secret_span!("create_secret", uri = %uri);
/// ```
#[macro_export]
macro_rules! secret_span {
    ($operation:expr) => {
        tracing::info_span!(
            "secret_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::info_span!(
            "secret_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the configured level. Fails if a subscriber is
/// already installed.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| StrongroomError::config(format!("Invalid log level '{}': {}", config.log_level, e)))?;

    let result = if config.json_logging {
        fmt().json().with_env_filter(filter).with_current_span(true).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };

    result.map_err(|e| StrongroomError::internal(format!("Failed to install tracing subscriber: {}", e)))
}

/// Log configuration at startup
pub fn log_config_info(config: &crate::config::AppConfig) {
    tracing::info!(
        storage_backend = ?config.storage.backend,
        storage_url = %crate::storage::sanitize_url(&config.storage.url),
        metrics_enabled = %config.observability.enable_metrics,
        request_timeout_secs = config.secrets.request_timeout_seconds,
        token_ttl_secs = config.secrets.token_ttl_seconds,
        "strongroom configuration"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macros_compile() {
        let _span = secret_span!("create_secret");
        let _span = secret_span!("create_secret", uri = "secret:abc", revision = 0);
    }

    #[test]
    fn test_log_config_info() {
        let config = crate::config::AppConfig::default();
        log_config_info(&config);
    }

    #[test]
    fn test_init_tracing_rejects_bad_level() {
        let config = ObservabilityConfig { log_level: "[[".to_string(), ..Default::default() };
        // A RUST_LOG in the environment takes precedence over the configured level.
        if std::env::var("RUST_LOG").is_err() {
            assert!(init_tracing(&config).is_err());
        }
    }
}
