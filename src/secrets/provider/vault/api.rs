//! Narrow vault API used by the provider and its content store.
//!
//! Everything the vault backend needs from a server goes through
//! [`VaultApi`], so the provider runs unchanged against a real server
//! ([`super::client::VaultrsClient`]) or the in-process
//! [`super::memory::MemoryVault`]. Implementations return already
//! classified [`SecretsError`]s.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::secrets::error::Result;
use crate::secrets::provider::store_config::VaultConnection;
use crate::secrets::types::SecretString;

/// Parameters for a child token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub policies: Vec<String>,
    pub ttl: Duration,
    pub no_default_policy: bool,
}

#[async_trait]
pub trait VaultApi: Send + Sync {
    /// Enable a KV v1 engine at `path`.
    async fn mount_kv1(&self, path: &str) -> Result<()>;

    async fn list_policies(&self) -> Result<Vec<String>>;

    /// Create or overwrite a policy.
    async fn put_policy(&self, name: &str, hcl: &str) -> Result<()>;

    async fn delete_policy(&self, name: &str) -> Result<()>;

    async fn create_token(&self, request: &TokenRequest) -> Result<SecretString>;

    async fn kv_get(&self, mount: &str, path: &str) -> Result<BTreeMap<String, String>>;

    async fn kv_put(&self, mount: &str, path: &str, data: &BTreeMap<String, String>) -> Result<()>;

    async fn kv_delete(&self, mount: &str, path: &str) -> Result<()>;

    /// Keys directly under `path` in the mount. An empty mount lists as empty.
    async fn kv_list(&self, mount: &str, path: &str) -> Result<Vec<String>>;

    /// Submit one unseal key share, returning whether the vault is still sealed.
    async fn unseal(&self, key: &SecretString) -> Result<bool>;

    async fn health(&self) -> Result<()>;
}

/// Builds a [`VaultApi`] bound to one connection and credential.
pub trait VaultConnector: Send + Sync + std::fmt::Debug {
    fn connect(&self, connection: &VaultConnection) -> Result<Arc<dyn VaultApi>>;
}
