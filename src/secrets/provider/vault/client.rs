//! [`VaultApi`] over a real vault server using `vaultrs`.
//!
//! This is the only place vault client errors are inspected; everything
//! leaves here as a classified [`SecretsError`].

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use vaultrs::api::sys::requests::EnableEngineRequestBuilder;
use vaultrs::api::token::requests::CreateTokenRequestBuilder;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::{kv1, sys, token};

use super::api::{TokenRequest, VaultApi, VaultConnector};
use crate::secrets::error::{Result, SecretsError};
use crate::secrets::provider::store_config::VaultConnection;
use crate::secrets::types::SecretString;

/// Default HTTP timeout for vault calls.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

const PATH_IN_USE: &str = "path is already in use";

/// Map a vault client error onto the secrets error taxonomy.
pub fn classify(error: ClientError, context: &str) -> SecretsError {
    match error {
        ClientError::APIError { code: 404, .. } => SecretsError::not_found("vault path", context),
        ClientError::APIError { code: 403, errors } => {
            SecretsError::permission_denied(format!("{}: {}", context, errors.join("; ")))
        }
        ClientError::APIError { code: 400, errors } if errors.iter().any(|e| e.contains(PATH_IN_USE)) => {
            SecretsError::already_exists("vault mount", context)
        }
        ClientError::APIError { code: 503, errors } => {
            SecretsError::unavailable(format!("{}: {}", context, errors.join("; ")))
        }
        ClientError::APIError { code, errors } => {
            SecretsError::backend_error(format!("{}: HTTP {}: {}", context, code, errors.join("; ")))
        }
        ClientError::RestClientError { source } => {
            SecretsError::unavailable(format!("{}: {}", context, source))
        }
        other => SecretsError::backend_error(format!("{}: {}", context, other)),
    }
}

/// Connects [`VaultrsClient`]s with a fixed HTTP timeout.
#[derive(Debug, Clone)]
pub struct VaultrsConnector {
    timeout: Duration,
}

impl Default for VaultrsConnector {
    fn default() -> Self {
        Self { timeout: DEFAULT_CLIENT_TIMEOUT }
    }
}

impl VaultrsConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl VaultConnector for VaultrsConnector {
    fn connect(&self, connection: &VaultConnection) -> Result<Arc<dyn VaultApi>> {
        Ok(Arc::new(VaultrsClient::new(connection, self.timeout)?))
    }
}

pub struct VaultrsClient {
    client: VaultClient,
    // Holds the CA bundle on disk for the lifetime of the client.
    _ca_file: Option<NamedTempFile>,
}

impl std::fmt::Debug for VaultrsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultrsClient").field("client", &"[VaultClient]").finish()
    }
}

impl VaultrsClient {
    pub fn new(connection: &VaultConnection, timeout: Duration) -> Result<Self> {
        connection.validate()?;

        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder
            .address(&connection.endpoint)
            .token(connection.token.expose_secret())
            .timeout(Some(timeout));

        if let Some(namespace) = &connection.namespace {
            settings_builder.namespace(Some(namespace.clone()));
        }

        let ca_file = match &connection.ca_cert {
            Some(pem) => {
                let file = write_ca_bundle(pem)?;
                settings_builder.ca_certs(vec![file.path().to_string_lossy().into_owned()]);
                Some(file)
            }
            None => None,
        };

        if let (Some(cert), Some(key)) = (&connection.client_cert, &connection.client_key) {
            let mut pem = cert.clone().into_bytes();
            pem.push(b'\n');
            pem.extend_from_slice(key.expose_secret().as_bytes());
            let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
                SecretsError::config_error(format!("Invalid vault client certificate: {}", e))
            })?;
            settings_builder.identity(Some(identity));
        }

        if let Some(server_name) = &connection.tls_server_name {
            tracing::warn!(
                tls_server_name = %server_name,
                endpoint = %connection.endpoint,
                "tls-server-name override is not supported by the vault client, using the endpoint host"
            );
        }

        let settings = settings_builder.build().map_err(|e| {
            SecretsError::config_error(format!("Invalid Vault configuration: {}", e))
        })?;
        let client = VaultClient::new(settings)
            .map_err(|e| classify(e, "failed to create vault client"))?;

        Ok(Self { client, _ca_file: ca_file })
    }
}

fn write_ca_bundle(pem: &str) -> Result<NamedTempFile> {
    let io_err = |e: std::io::Error| SecretsError::config_error(format!("Failed to write vault CA bundle: {}", e));
    let mut file = NamedTempFile::new().map_err(io_err)?;
    file.write_all(pem.as_bytes()).map_err(io_err)?;
    file.flush().map_err(io_err)?;
    Ok(file)
}

#[async_trait]
impl VaultApi for VaultrsClient {
    async fn mount_kv1(&self, path: &str) -> Result<()> {
        let mut options = EnableEngineRequestBuilder::default();
        options.options(HashMap::from([("version".to_string(), "1".to_string())]));
        sys::mount::enable(&self.client, path, "kv", Some(&mut options))
            .await
            .map_err(|e| classify(e, path))
    }

    async fn list_policies(&self) -> Result<Vec<String>> {
        sys::policy::list(&self.client)
            .await
            .map(|r| r.policies)
            .map_err(|e| classify(e, "sys/policy"))
    }

    async fn put_policy(&self, name: &str, hcl: &str) -> Result<()> {
        sys::policy::set(&self.client, name, hcl).await.map_err(|e| classify(e, name))
    }

    async fn delete_policy(&self, name: &str) -> Result<()> {
        sys::policy::delete(&self.client, name).await.map_err(|e| classify(e, name))
    }

    async fn create_token(&self, request: &TokenRequest) -> Result<SecretString> {
        let mut options = CreateTokenRequestBuilder::default();
        options
            .policies(request.policies.clone())
            .no_default_policy(request.no_default_policy)
            .ttl(format!("{}s", request.ttl.as_secs()));
        let auth = token::new(&self.client, Some(&mut options))
            .await
            .map_err(|e| classify(e, "auth/token/create"))?;
        Ok(SecretString::new(auth.client_token))
    }

    async fn kv_get(&self, mount: &str, path: &str) -> Result<BTreeMap<String, String>> {
        kv1::get(&self.client, mount, path)
            .await
            .map_err(|e| classify(e, &format!("{}/{}", mount, path)))
    }

    async fn kv_put(&self, mount: &str, path: &str, data: &BTreeMap<String, String>) -> Result<()> {
        let body: HashMap<&str, &str> = data.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        kv1::set(&self.client, mount, path, &body)
            .await
            .map_err(|e| classify(e, &format!("{}/{}", mount, path)))
    }

    async fn kv_delete(&self, mount: &str, path: &str) -> Result<()> {
        kv1::delete(&self.client, mount, path)
            .await
            .map_err(|e| classify(e, &format!("{}/{}", mount, path)))
    }

    async fn kv_list(&self, mount: &str, path: &str) -> Result<Vec<String>> {
        match kv1::list(&self.client, mount, path).await {
            Ok(response) => Ok(response.data.keys),
            // An empty KV v1 listing answers 404.
            Err(ClientError::APIError { code: 404, .. }) => Ok(Vec::new()),
            Err(e) => Err(classify(e, &format!("{}/{}", mount, path))),
        }
    }

    async fn unseal(&self, key: &SecretString) -> Result<bool> {
        sys::unseal(&self.client, Some(key.expose_secret().to_string()), None, None)
            .await
            .map(|r| r.sealed)
            .map_err(|e| classify(e, "sys/unseal"))
    }

    async fn health(&self) -> Result<()> {
        sys::health(&self.client).await.map(|_| ()).map_err(|e| classify(e, "sys/health"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::error::ErrorKind;

    fn api_error(code: u16, errors: &[&str]) -> ClientError {
        ClientError::APIError { code, errors: errors.iter().map(|e| e.to_string()).collect() }
    }

    #[test]
    fn test_classify_status_codes() {
        assert_eq!(classify(api_error(404, &[]), "m/a-0").kind(), ErrorKind::NotFound);
        assert_eq!(
            classify(api_error(403, &["permission denied"]), "m/a-0").kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(
            classify(api_error(400, &["path is already in use at m/"]), "m").kind(),
            ErrorKind::AlreadyExists
        );
        assert_eq!(classify(api_error(400, &["invalid request"]), "m").kind(), ErrorKind::Backend);
        assert_eq!(classify(api_error(503, &["Vault is sealed"]), "m").kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn test_classify_keeps_context() {
        let err = classify(api_error(403, &["permission denied"]), "m/a-0");
        assert!(err.to_string().contains("m/a-0"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_client_builds_for_valid_connection() {
        let conn = VaultConnection::new("http://127.0.0.1:8200", "root");
        assert!(VaultrsConnector::default().connect(&conn).is_ok());
    }

    #[test]
    fn test_client_rejects_invalid_connection() {
        let conn = VaultConnection::new("not a url", "root");
        assert_eq!(
            VaultrsClient::new(&conn, DEFAULT_CLIENT_TIMEOUT).unwrap_err().kind(),
            ErrorKind::Config
        );
    }
}
