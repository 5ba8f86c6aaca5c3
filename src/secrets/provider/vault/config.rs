//! Administrative vault configuration for a model.
//!
//! The model carries its backend configuration as a string. JSON is tried
//! first, then YAML.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::secrets::error::{Result, SecretsError};
use crate::secrets::provider::store_config::VaultConnection;
use crate::secrets::types::SecretString;

/// Default lifetime of minted agent credentials.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VaultBackendConfig {
    pub endpoint: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub token: SecretString,
    #[serde(default)]
    pub ca_cert: Option<String>,
    #[serde(default)]
    pub client_cert: Option<String>,
    #[serde(default)]
    pub client_key: Option<SecretString>,
    #[serde(default)]
    pub tls_server_name: Option<String>,
    /// Unseal keys, applied in order when the vault reports sealed.
    #[serde(default)]
    pub keys: Vec<SecretString>,
}

impl std::fmt::Debug for VaultBackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultBackendConfig")
            .field("endpoint", &self.endpoint)
            .field("namespace", &self.namespace)
            .field("token", &self.token)
            .field("has_ca_cert", &self.ca_cert.is_some())
            .field("has_client_cert", &self.client_cert.is_some())
            .field("tls_server_name", &self.tls_server_name)
            .field("unseal_keys", &self.keys.len())
            .finish()
    }
}

impl VaultBackendConfig {
    /// Parse a model's backend configuration string.
    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self = match serde_json::from_str(raw) {
            Ok(config) => config,
            Err(json_err) => serde_yaml::from_str(raw).map_err(|yaml_err| {
                SecretsError::config_error(format!(
                    "invalid vault backend config: not JSON ({}) or YAML ({})",
                    json_err, yaml_err
                ))
            })?,
        };
        config.connection().validate()?;
        Ok(config)
    }

    /// The administrative connection.
    pub fn connection(&self) -> VaultConnection {
        VaultConnection {
            endpoint: self.endpoint.clone(),
            namespace: self.namespace.clone(),
            token: self.token.clone(),
            ca_cert: self.ca_cert.clone(),
            client_cert: self.client_cert.clone(),
            client_key: self.client_key.clone(),
            tls_server_name: self.tls_server_name.clone(),
        }
    }
}
