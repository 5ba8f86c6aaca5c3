//! Vault backend.
//!
//! Each model gets a KV v1 mount named after its uuid; revision content lives
//! at `<model-uuid>/<id>-<revision>`. Agents never see the administrative
//! token: [`VaultProvider::store_config`] writes per-secret policies and mints
//! a short-lived child token bound to exactly those policies.

pub mod api;
pub mod client;
pub mod config;
pub mod memory;
pub mod policy;

pub use api::{TokenRequest, VaultApi, VaultConnector};
pub use client::{VaultrsClient, VaultrsConnector};
pub use config::{VaultBackendConfig, DEFAULT_TOKEN_TTL};
pub use memory::MemoryVault;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::{ModelInfo, ProviderKind, SecretBackendProvider, StoreConfig};
use crate::observability::metrics;
use crate::secrets::content::ContentStore;
use crate::secrets::context::{CallKind, RequestContext};
use crate::secrets::error::{ErrorKind, Result, SecretsError};
use crate::secrets::metadata::SecretRevisions;
use crate::secrets::retry::RetryPolicy;
use crate::secrets::tag::EntityTag;
use crate::secrets::uri::SecretUri;
use crate::secrets::value::SecretValue;
use policy::Policy;

const BACKEND: &str = "vault";

#[derive(Debug, Clone)]
pub struct VaultProvider {
    connector: Arc<dyn VaultConnector>,
    token_ttl: Duration,
    retry: RetryPolicy,
}

impl VaultProvider {
    pub fn new(connector: Arc<dyn VaultConnector>) -> Self {
        Self { connector, token_ttl: DEFAULT_TOKEN_TTL, retry: RetryPolicy::default() }
    }

    /// Lifetime of minted agent tokens.
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn admin_config(model: &ModelInfo) -> Result<VaultBackendConfig> {
        let raw = model.backend_config.as_deref().ok_or_else(|| {
            SecretsError::config_error(format!("model {} has no vault backend config", model.uuid))
        })?;
        VaultBackendConfig::parse(raw)
    }

    /// Administrative client, unsealing the vault first when keys are configured.
    async fn admin_client(
        &self,
        ctx: &RequestContext,
        model: &ModelInfo,
    ) -> Result<(VaultBackendConfig, Arc<dyn VaultApi>)> {
        let config = Self::admin_config(model)?;
        let api = self.connector.connect(&config.connection())?;
        if !config.keys.is_empty() {
            unseal(ctx, api.as_ref(), &config).await?;
        }
        Ok((config, api))
    }

    async fn list_policies(&self, ctx: &RequestContext, api: &dyn VaultApi) -> Result<Vec<String>> {
        self.retry
            .retry(ctx, "list_policies", || ctx.run("list_policies", CallKind::Read, api.list_policies()))
            .await
    }

    /// Delete the named policies, treating already-deleted ones as success.
    async fn delete_policies(&self, ctx: &RequestContext, api: &dyn VaultApi, names: &[String]) -> Result<()> {
        for name in names {
            match ctx.run("delete_policy", CallKind::Write, api.delete_policy(name)).await {
                Ok(()) => debug!(policy = %name, "Deleted vault policy"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.annotate(format_args!("deleting policy {:?}", name))),
            }
        }
        metrics::record_policies_deleted(BACKEND, names.len()).await;
        Ok(())
    }
}

fn tag_label(tag: Option<&EntityTag>) -> String {
    tag.map_or_else(|| "admin".to_string(), |t| t.to_string())
}

async fn unseal(ctx: &RequestContext, api: &dyn VaultApi, config: &VaultBackendConfig) -> Result<()> {
    for key in &config.keys {
        let sealed = ctx.run("unseal", CallKind::Write, api.unseal(key)).await?;
        if !sealed {
            return Ok(());
        }
    }
    Err(SecretsError::unavailable(format!(
        "vault at {} is still sealed after applying {} unseal keys",
        config.endpoint,
        config.keys.len()
    )))
}

#[async_trait]
impl SecretBackendProvider for VaultProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Vault
    }

    #[instrument(skip(self, ctx, model), fields(model_uuid = %model.uuid))]
    async fn initialise(&self, ctx: &RequestContext, model: &ModelInfo) -> Result<()> {
        let (_, api) = self.admin_client(ctx, model).await?;
        let mount = model.uuid.to_string();
        match ctx.run("mount_kv1", CallKind::Write, api.mount_kv1(&mount)).await {
            Ok(()) => {
                info!(mount = %mount, "Enabled KV v1 secrets engine for model");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(mount = %mount, "Model secrets engine already enabled");
                Ok(())
            }
            Err(e) => Err(e.annotate(format_args!("enabling secrets engine {:?}", mount))),
        }
    }

    #[instrument(skip(self, ctx, model), fields(model_uuid = %model.uuid))]
    async fn cleanup_model(&self, ctx: &RequestContext, model: &ModelInfo) -> Result<()> {
        let (_, api) = self.admin_client(ctx, model).await?;

        let prefix = policy::model_prefix(&model.uuid);
        let names: Vec<String> = self
            .list_policies(ctx, api.as_ref())
            .await?
            .into_iter()
            .filter(|name| name.starts_with(&prefix))
            .collect();
        self.delete_policies(ctx, api.as_ref(), &names).await?;

        let mount = model.uuid.to_string();
        let keys = match self
            .retry
            .retry(ctx, "list_content", || ctx.run("list_content", CallKind::Read, api.kv_list(&mount, "")))
            .await
        {
            Ok(keys) => keys,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };
        for key in &keys {
            match ctx.run("delete_content", CallKind::Write, api.kv_delete(&mount, key)).await {
                Ok(()) | Err(SecretsError::NotFound { .. }) => {}
                Err(e) => return Err(e.annotate(format_args!("deleting secret content {:?}", key))),
            }
        }

        info!(policies = names.len(), keys = keys.len(), "Cleaned up model vault resources");
        Ok(())
    }

    #[instrument(skip(self, ctx, model, removed), fields(model_uuid = %model.uuid, removed = removed.len()))]
    async fn cleanup_secrets(
        &self,
        ctx: &RequestContext,
        model: &ModelInfo,
        tag: Option<&EntityTag>,
        removed: &[SecretUri],
    ) -> Result<()> {
        if removed.is_empty() {
            return Ok(());
        }
        let (_, api) = self.admin_client(ctx, model).await?;

        let ids: BTreeSet<&str> = removed.iter().map(|uri| uri.id()).collect();
        let names: Vec<String> = self
            .list_policies(ctx, api.as_ref())
            .await?
            .into_iter()
            .filter(|name| {
                policy::parse_secret_policy_name(&model.uuid, name).is_some_and(|(id, _)| ids.contains(id))
            })
            .collect();
        self.delete_policies(ctx, api.as_ref(), &names).await?;

        debug!(
            tag = %tag_label(tag),
            policies = names.len(),
            "Pruned policies for removed secrets"
        );
        Ok(())
    }

    #[instrument(
        skip(self, ctx, model, owned, consumed),
        fields(model_uuid = %model.uuid, owned = owned.len(), consumed = consumed.len())
    )]
    async fn store_config(
        &self,
        ctx: &RequestContext,
        model: &ModelInfo,
        tag: Option<&EntityTag>,
        owned: &SecretRevisions,
        consumed: &SecretRevisions,
    ) -> Result<StoreConfig> {
        let (config, api) = self.admin_client(ctx, model).await?;

        let policies: Vec<Policy> = match tag {
            None => vec![policy::admin_read_policy(&model.uuid)],
            Some(_) => std::iter::once(policy::agent_create_policy(&model.uuid))
                .chain(owned.uris().map(|uri| policy::owner_policy(&model.uuid, uri)))
                .chain(consumed.uris().map(|uri| policy::reader_policy(&model.uuid, uri)))
                .collect(),
        };

        for p in &policies {
            ctx.run("put_policy", CallKind::Write, api.put_policy(&p.name, &p.to_hcl()))
                .await
                .map_err(|e| e.annotate(format_args!("writing policy {:?}", p.name)))?;
        }

        let request = TokenRequest {
            policies: policies.iter().map(|p| p.name.clone()).collect(),
            ttl: self.token_ttl,
            no_default_policy: true,
        };
        let token = ctx.run("create_token", CallKind::Write, api.create_token(&request)).await?;
        metrics::record_credential_minted(BACKEND, policies.len()).await;

        info!(
            tag = %tag_label(tag),
            policies = policies.len(),
            ttl_secs = self.token_ttl.as_secs(),
            "Minted scoped vault token"
        );

        Ok(StoreConfig::vault(model.uuid, model.controller_uuid, config.connection().with_token(token)))
    }

    fn new_store(&self, config: &StoreConfig) -> Result<Arc<dyn ContentStore>> {
        if config.kind != ProviderKind::Vault {
            return Err(SecretsError::config_error(format!(
                "vault provider cannot open a {} store",
                config.kind
            )));
        }
        let api = self.connector.connect(config.vault_connection()?)?;
        Ok(Arc::new(VaultContentStore::new(api, config.model_uuid.to_string(), self.retry)))
    }

    async fn admin_store(&self, ctx: &RequestContext, model: &ModelInfo) -> Result<Arc<dyn ContentStore>> {
        let (_, api) = self.admin_client(ctx, model).await?;
        Ok(Arc::new(VaultContentStore::new(api, model.uuid.to_string(), self.retry)))
    }

    async fn health_check(&self, ctx: &RequestContext, model: &ModelInfo) -> Result<()> {
        let (config, api) = self.admin_client(ctx, model).await?;
        ctx.run("health", CallKind::Read, api.health()).await.map_err(|e| {
            warn!(endpoint = %config.endpoint, error = %e, "Vault health check failed");
            e
        })
    }
}

/// Content store over one model's KV v1 mount.
pub struct VaultContentStore {
    api: Arc<dyn VaultApi>,
    mount: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for VaultContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultContentStore").field("mount", &self.mount).finish()
    }
}

impl VaultContentStore {
    pub fn new(api: Arc<dyn VaultApi>, mount: String, retry: RetryPolicy) -> Self {
        Self { api, mount, retry }
    }

    async fn observe<T>(&self, operation: &str, started: Instant, result: Result<T>) -> Result<T> {
        metrics::record_content_operation(BACKEND, operation, started.elapsed().as_secs_f64(), result.is_ok())
            .await;
        result
    }
}

#[async_trait]
impl ContentStore for VaultContentStore {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Vault
    }

    #[instrument(skip(self, ctx), fields(mount = %self.mount))]
    async fn get_content(&self, ctx: &RequestContext, address: &str) -> Result<SecretValue> {
        let started = Instant::now();
        let result = self
            .retry
            .retry(ctx, "get_content", || {
                ctx.run("get_content", CallKind::Read, self.api.kv_get(&self.mount, address))
            })
            .await
            .map_err(|e| e.annotate(format_args!("reading secret content {:?}", address)))
            .and_then(SecretValue::from_encoded);
        self.observe("get_content", started, result).await
    }

    #[instrument(skip(self, ctx, value), fields(mount = %self.mount, uri = %uri))]
    async fn save_content(
        &self,
        ctx: &RequestContext,
        uri: &SecretUri,
        revision: u32,
        value: &SecretValue,
    ) -> Result<String> {
        let started = Instant::now();
        let address = uri.name(revision);
        let result = ctx
            .run("save_content", CallKind::Write, self.api.kv_put(&self.mount, &address, value.encoded_values()))
            .await
            .map(|_| address)
            .map_err(|e| e.annotate(format_args!("writing secret content for {} revision {}", uri, revision)));
        self.observe("save_content", started, result).await
    }

    #[instrument(skip(self, ctx), fields(mount = %self.mount))]
    async fn delete_content(&self, ctx: &RequestContext, address: &str) -> Result<()> {
        let started = Instant::now();
        let result = match ctx.run("delete_content", CallKind::Write, self.api.kv_delete(&self.mount, address)).await {
            Ok(()) | Err(SecretsError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.annotate(format_args!("deleting secret content {:?}", address))),
        };
        self.observe("delete_content", started, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn model_for(vault: &MemoryVault) -> ModelInfo {
        let config = format!(r#"{{"endpoint": "http://127.0.0.1:8200", "token": "{}"}}"#, vault.root_token());
        ModelInfo::new(Uuid::new_v4(), Uuid::new_v4(), "test").with_backend(ProviderKind::Vault, Some(config))
    }

    fn provider(vault: &MemoryVault) -> VaultProvider {
        VaultProvider::new(Arc::new(vault.clone())).with_retry_policy(RetryPolicy::none())
    }

    #[tokio::test]
    async fn test_initialise_is_idempotent() {
        let vault = MemoryVault::new("root");
        let provider = provider(&vault);
        let model = model_for(&vault);
        let ctx = RequestContext::new();

        provider.initialise(&ctx, &model).await.unwrap();
        provider.initialise(&ctx, &model).await.unwrap();
        assert_eq!(vault.mounts().await, vec![model.uuid.to_string()]);
    }

    #[tokio::test]
    async fn test_missing_backend_config() {
        let vault = MemoryVault::new("root");
        let model = ModelInfo::new(Uuid::new_v4(), Uuid::new_v4(), "test");
        let err = provider(&vault).initialise(&RequestContext::new(), &model).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_admin_store_config_reads_everything() {
        let vault = MemoryVault::new("root");
        let provider = provider(&vault);
        let model = model_for(&vault);
        let ctx = RequestContext::new();
        provider.initialise(&ctx, &model).await.unwrap();

        let uri = SecretUri::new("abc").unwrap();
        let admin = provider.admin_store(&ctx, &model).await.unwrap();
        admin.save_content(&ctx, &uri, 0, &SecretValue::new([("key", "v")])).await.unwrap();

        let config = provider
            .store_config(&ctx, &model, None, &SecretRevisions::new(), &SecretRevisions::new())
            .await
            .unwrap();
        assert_ne!(config.vault_connection().unwrap().token.expose_secret(), "root");
        assert_eq!(vault.policy_names().await, vec![format!("model-{}-read", model.uuid)]);

        let store = provider.new_store(&config).unwrap();
        assert!(store.get_content(&ctx, "abc-0").await.is_ok());
        let err = store.save_content(&ctx, &uri, 1, &SecretValue::new([("key", "v")])).await.unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn test_unseals_with_configured_keys() {
        let vault = MemoryVault::new("root");
        vault.seal(&["k1", "k2"], 2).await;
        let config = r#"{"endpoint": "http://127.0.0.1:8200", "token": "root", "keys": ["k1", "k2"]}"#;
        let model = ModelInfo::new(Uuid::new_v4(), Uuid::new_v4(), "test")
            .with_backend(ProviderKind::Vault, Some(config.to_string()));

        provider(&vault).initialise(&RequestContext::new(), &model).await.unwrap();
        assert!(!vault.is_sealed().await);
    }

    #[tokio::test]
    async fn test_sealed_without_enough_keys() {
        let vault = MemoryVault::new("root");
        vault.seal(&["k1", "k2"], 2).await;
        let config = r#"{"endpoint": "http://127.0.0.1:8200", "token": "root", "keys": ["k1"]}"#;
        let model = ModelInfo::new(Uuid::new_v4(), Uuid::new_v4(), "test")
            .with_backend(ProviderKind::Vault, Some(config.to_string()));

        let err = provider(&vault).health_check(&RequestContext::new(), &model).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_new_store_rejects_internal_config() {
        let vault = MemoryVault::new("root");
        let config = StoreConfig::internal(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(provider(&vault).new_store(&config).unwrap_err().kind(), ErrorKind::Config);
    }
}
