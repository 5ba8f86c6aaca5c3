//! Backend connection parameters handed to content store clients.
//!
//! Holding a [`StoreConfig`] grants whatever its credential allows, so the
//! token and client key are [`SecretString`]s and never appear in Debug output.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::ProviderKind;
use crate::secrets::error::{Result, SecretsError};
use crate::secrets::types::SecretString;

pub const BACKEND_TYPE_KEY: &str = "backend-type";
pub const MODEL_UUID_KEY: &str = "model-uuid";
pub const CONTROLLER_UUID_KEY: &str = "controller-uuid";
pub const ENDPOINT_KEY: &str = "endpoint";
pub const NAMESPACE_KEY: &str = "namespace";
pub const TOKEN_KEY: &str = "token";
pub const CA_CERT_KEY: &str = "ca-cert";
pub const CLIENT_CERT_KEY: &str = "client-cert";
pub const CLIENT_KEY_KEY: &str = "client-key";
pub const TLS_SERVER_NAME_KEY: &str = "tls-server-name";

/// Connection to a vault server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VaultConnection {
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
}

impl VaultConnection {
    pub fn new(endpoint: impl Into<String>, token: impl Into<SecretString>) -> Self {
        Self {
            endpoint: endpoint.into(),
            namespace: None,
            token: token.into(),
            ca_cert: None,
            client_cert: None,
            client_key: None,
            tls_server_name: None,
        }
    }

    /// Same connection with a different credential.
    pub fn with_token(&self, token: SecretString) -> Self {
        Self { token, ..self.clone() }
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.endpoint).map_err(|e| {
            SecretsError::config_error(format!("invalid vault endpoint {:?}: {}", self.endpoint, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SecretsError::config_error(format!(
                "vault endpoint {:?} must use http or https",
                self.endpoint
            )));
        }
        if self.token.is_empty() {
            return Err(SecretsError::config_error("vault token is required"));
        }
        if self.client_cert.is_some() != self.client_key.is_some() {
            return Err(SecretsError::config_error(
                "vault client cert and client key must be specified together",
            ));
        }
        Ok(())
    }
}

/// Connection parameters for one model's content store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub kind: ProviderKind,
    pub model_uuid: Uuid,
    pub controller_uuid: Uuid,
    pub vault: Option<VaultConnection>,
    /// Provider-specific keys carried through unchanged.
    pub extra: BTreeMap<String, String>,
}

impl StoreConfig {
    pub fn internal(model_uuid: Uuid, controller_uuid: Uuid) -> Self {
        Self {
            kind: ProviderKind::Internal,
            model_uuid,
            controller_uuid,
            vault: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn vault(model_uuid: Uuid, controller_uuid: Uuid, connection: VaultConnection) -> Self {
        Self {
            kind: ProviderKind::Vault,
            model_uuid,
            controller_uuid,
            vault: Some(connection),
            extra: BTreeMap::new(),
        }
    }

    /// Vault connection, required for vault configs.
    pub fn vault_connection(&self) -> Result<&VaultConnection> {
        self.vault
            .as_ref()
            .ok_or_else(|| SecretsError::config_error("store config has no vault connection"))
    }

    /// Flat wire form. Credentials are included in the clear.
    pub fn to_params(&self) -> BTreeMap<String, String> {
        let mut params = self.extra.clone();
        params.insert(BACKEND_TYPE_KEY.to_string(), self.kind.to_string());
        params.insert(MODEL_UUID_KEY.to_string(), self.model_uuid.to_string());
        params.insert(CONTROLLER_UUID_KEY.to_string(), self.controller_uuid.to_string());

        if let Some(vault) = &self.vault {
            params.insert(ENDPOINT_KEY.to_string(), vault.endpoint.clone());
            params.insert(TOKEN_KEY.to_string(), vault.token.expose_secret().to_string());
            let optional = [
                (NAMESPACE_KEY, vault.namespace.as_deref()),
                (CA_CERT_KEY, vault.ca_cert.as_deref()),
                (CLIENT_CERT_KEY, vault.client_cert.as_deref()),
                (CLIENT_KEY_KEY, vault.client_key.as_ref().map(|k| k.expose_secret())),
                (TLS_SERVER_NAME_KEY, vault.tls_server_name.as_deref()),
            ];
            for (key, value) in optional {
                if let Some(value) = value {
                    params.insert(key.to_string(), value.to_string());
                }
            }
        }
        params
    }

    /// Parse the flat wire form.
    pub fn from_params(mut params: BTreeMap<String, String>) -> Result<Self> {
        let mut take = |key: &str| params.remove(key).filter(|v| !v.is_empty());

        let kind: ProviderKind = take(BACKEND_TYPE_KEY)
            .ok_or_else(|| SecretsError::config_error("store config is missing backend-type"))?
            .parse()?;
        let model_uuid = parse_uuid(take(MODEL_UUID_KEY), MODEL_UUID_KEY)?;
        let controller_uuid = parse_uuid(take(CONTROLLER_UUID_KEY), CONTROLLER_UUID_KEY)?;

        let vault = match kind {
            ProviderKind::Internal => None,
            ProviderKind::Vault => {
                let endpoint = take(ENDPOINT_KEY)
                    .ok_or_else(|| SecretsError::config_error("vault store config is missing endpoint"))?;
                let token = take(TOKEN_KEY)
                    .ok_or_else(|| SecretsError::config_error("vault store config is missing token"))?;
                let connection = VaultConnection {
                    endpoint,
                    namespace: take(NAMESPACE_KEY),
                    token: SecretString::new(token),
                    ca_cert: take(CA_CERT_KEY),
                    client_cert: take(CLIENT_CERT_KEY),
                    client_key: take(CLIENT_KEY_KEY).map(SecretString::new),
                    tls_server_name: take(TLS_SERVER_NAME_KEY),
                };
                connection.validate()?;
                Some(connection)
            }
        };

        Ok(Self { kind, model_uuid, controller_uuid, vault, extra: params })
    }
}

fn parse_uuid(value: Option<String>, key: &str) -> Result<Uuid> {
    let value = value.ok_or_else(|| SecretsError::config_error(format!("store config is missing {}", key)))?;
    Uuid::parse_str(&value)
        .map_err(|e| SecretsError::config_error(format!("invalid {} {:?}: {}", key, value, e)))
}
