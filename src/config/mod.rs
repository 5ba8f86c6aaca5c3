//! # Configuration Management
//!
//! Layered configuration: built-in defaults, then an optional file (TOML, YAML
//! or JSON by extension), then `STRONGROOM__SECTION__FIELD` environment
//! variables. The merged result is validated before use.

pub mod settings;

pub use settings::{
    AppConfig, ObservabilityConfig, SecretsConfig, StorageBackend, StorageConfig,
};

use crate::errors::Result;
use std::path::Path;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "STRONGROOM";

/// Load and validate the application configuration.
pub fn load(path: Option<&Path>) -> Result<AppConfig> {
    let mut builder =
        config::Config::builder().add_source(config::Config::try_from(&AppConfig::default())?);

    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let app_config: AppConfig = builder.build()?.try_deserialize()?;
    app_config.validate()?;

    tracing::debug!(
        storage_backend = ?app_config.storage.backend,
        token_ttl_seconds = app_config.secrets.token_ttl_seconds,
        request_timeout_seconds = app_config.secrets.request_timeout_seconds,
        "Loaded configuration"
    );

    Ok(app_config)
}
