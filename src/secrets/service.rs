//! Secrets business logic service
//!
//! [`SecretsService`] ties the metadata catalog to the content store of the
//! model's backend. With a backend that shares the document store, content
//! and metadata commit in one transaction. Otherwise writes are ordered so a
//! crash never leaves content without metadata: create and update write
//! metadata first, delete removes content first.

use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use super::content::ContentStore;
use super::context::{CallKind, RequestContext};
use super::error::{Result, SecretsError};
use super::metadata::{SecretMetadata, SecretRevisions};
use super::metadata_store::{MetadataStore, NewRevision, SecretFilter};
use super::params::{complete_params, merge_params, CreateParams, ParamsValidator, PassthroughParams, UpdateParams};
use super::provider::{ModelInfo, ProviderRegistry, SecretBackendProvider, StoreConfig};
use super::retry::RetryPolicy;
use super::tag::EntityTag;
use super::uri::SecretUri;
use super::value::SecretValue;
use crate::observability::metrics;
use crate::storage::{DocumentStore, TxnOp};

/// Service for managing the secrets of one model
#[derive(Debug, Clone)]
pub struct SecretsService {
    registry: Arc<ProviderRegistry>,
    metadata: MetadataStore,
    model: ModelInfo,
    params_validator: Arc<dyn ParamsValidator>,
    retry: RetryPolicy,
}

impl SecretsService {
    /// Create a service bound to `model` and its configured backend
    pub fn for_model(registry: Arc<ProviderRegistry>, store: Arc<dyn DocumentStore>, model: ModelInfo) -> Self {
        Self {
            registry,
            metadata: MetadataStore::new(store, model.uuid),
            model,
            params_validator: Arc::new(PassthroughParams),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_params_validator(mut self, validator: Arc<dyn ParamsValidator>) -> Self {
        self.params_validator = validator;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &ModelInfo {
        &self.model
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    fn provider(&self) -> Result<Arc<dyn SecretBackendProvider>> {
        self.registry.get(self.model.backend)
    }

    async fn content_store(&self, ctx: &RequestContext) -> Result<Arc<dyn ContentStore>> {
        self.provider()?.admin_store(ctx, &self.model).await
    }

    /// Metadata is committed but content is not. Logged and counted here so
    /// every caller reports it the same way.
    async fn inconsistent(&self, uri: &SecretUri, revision: u32, source: SecretsError) -> SecretsError {
        error!(
            uri = %uri,
            revision,
            backend = %self.model.backend,
            error = %source,
            "Secret metadata written but content write failed"
        );
        metrics::record_inconsistency(self.model.backend.as_str()).await;
        SecretsError::inconsistent(uri.to_string(), revision, source)
    }

    /// Provision the model namespace on its backend
    #[instrument(skip(self, ctx), fields(model_uuid = %self.model.uuid, backend = %self.model.backend))]
    pub async fn initialise_model(&self, ctx: &RequestContext) -> Result<()> {
        self.provider()?.initialise(ctx, &self.model).await
    }

    /// Remove everything the backend holds for the model
    #[instrument(skip(self, ctx), fields(model_uuid = %self.model.uuid, backend = %self.model.backend))]
    pub async fn cleanup_model(&self, ctx: &RequestContext) -> Result<()> {
        self.provider()?.cleanup_model(ctx, &self.model).await
    }

    pub async fn health_check(&self, ctx: &RequestContext) -> Result<()> {
        self.provider()?.health_check(ctx, &self.model).await
    }

    /// Create a secret and its first revision
    #[instrument(skip(self, ctx, params), fields(uri = %uri, backend = %self.model.backend))]
    pub async fn create_secret(
        &self,
        ctx: &RequestContext,
        uri: &SecretUri,
        params: &CreateParams,
    ) -> Result<SecretMetadata> {
        params.check()?;
        let data = params
            .data
            .as_ref()
            .ok_or_else(|| SecretsError::validation_field("secret content is required", "data"))?;
        let options = complete_params(self.params_validator.as_ref(), &params.params)?;
        ctx.check("create_secret")?;

        let store = self.content_store(ctx).await?;
        let checksum = data.checksum();

        let metadata = match store.staging() {
            Some(staging) => {
                let (_, ops) = staging.save_ops(uri, 0, data)?;
                let (metadata, _) = ctx
                    .run(
                        "create_secret",
                        CallKind::Write,
                        self.metadata.create_secret(uri, self.model.backend, params, options, checksum, ops),
                    )
                    .await?;
                metadata
            }
            None => {
                let (metadata, _) = ctx
                    .run(
                        "create_secret",
                        CallKind::Write,
                        self.metadata.create_secret(uri, self.model.backend, params, options, checksum, Vec::new()),
                    )
                    .await?;
                if let Err(e) = store.save_content(ctx, uri, 0, data).await {
                    return Err(self.inconsistent(uri, 0, e).await);
                }
                metadata
            }
        };

        info!(owner = %metadata.owner_tag, scope = %metadata.scope, "Secret created");
        Ok(metadata)
    }

    #[instrument(skip(self, ctx), fields(uri = %uri))]
    pub async fn get_secret(&self, ctx: &RequestContext, uri: &SecretUri) -> Result<SecretMetadata> {
        self.retry
            .retry(ctx, "get_secret", || ctx.run("get_secret", CallKind::Read, self.metadata.get_secret(uri)))
            .await
    }

    #[instrument(skip(self, ctx))]
    pub async fn list_secrets(&self, ctx: &RequestContext, filter: &SecretFilter) -> Result<Vec<SecretMetadata>> {
        self.retry
            .retry(ctx, "list_secrets", || ctx.run("list_secrets", CallKind::Read, self.metadata.list_secrets(filter)))
            .await
    }

    /// Read the content of a revision, or of the latest one when `revision` is `None`
    #[instrument(skip(self, ctx), fields(uri = %uri))]
    pub async fn get_secret_value(
        &self,
        ctx: &RequestContext,
        uri: &SecretUri,
        revision: Option<u32>,
    ) -> Result<SecretValue> {
        let revision = match revision {
            Some(revision) => revision,
            None => self.get_secret(ctx, uri).await?.latest_revision,
        };
        let record = self
            .retry
            .retry(ctx, "get_revision", || {
                ctx.run("get_revision", CallKind::Read, self.metadata.get_revision(uri, revision))
            })
            .await?;
        self.get_content_at(ctx, &record.address).await
    }

    /// Read content at an address the caller already resolved
    #[instrument(skip(self, ctx))]
    pub async fn get_content_at(&self, ctx: &RequestContext, address: &str) -> Result<SecretValue> {
        let store = self.content_store(ctx).await?;
        // Backends retry their own transient read failures.
        store.get_content(ctx, address).await
    }

    /// Apply a partial update; new content appends revision `latest + 1`
    #[instrument(skip(self, ctx, params), fields(uri = %uri, backend = %self.model.backend))]
    pub async fn update_secret(
        &self,
        ctx: &RequestContext,
        uri: &SecretUri,
        params: &UpdateParams,
    ) -> Result<SecretMetadata> {
        params.check()?;
        let current = self.get_secret(ctx, uri).await?;
        let options = params
            .params
            .as_ref()
            .map(|update| merge_params(self.params_validator.as_ref(), &current.params, update))
            .transpose()?;
        ctx.check("update_secret")?;

        let Some(data) = &params.data else {
            let (metadata, _) = ctx
                .run(
                    "update_secret",
                    CallKind::Write,
                    self.metadata.update_secret(uri, params, options, None, Vec::new()),
                )
                .await?;
            info!(version = metadata.version, "Secret updated");
            return Ok(metadata);
        };

        let revision = current.latest_revision + 1;
        let new_revision = NewRevision { revision, checksum: data.checksum() };
        let store = self.content_store(ctx).await?;

        let metadata = match store.staging() {
            Some(staging) => {
                let (_, ops) = staging.save_ops(uri, revision, data)?;
                let (metadata, _) = ctx
                    .run(
                        "update_secret",
                        CallKind::Write,
                        self.metadata.update_secret(uri, params, options, Some(new_revision), ops),
                    )
                    .await?;
                metadata
            }
            None => {
                let (metadata, _) = ctx
                    .run(
                        "update_secret",
                        CallKind::Write,
                        self.metadata.update_secret(uri, params, options, Some(new_revision), Vec::new()),
                    )
                    .await?;
                if let Err(e) = store.save_content(ctx, uri, revision, data).await {
                    return Err(self.inconsistent(uri, revision, e).await);
                }
                metadata
            }
        };

        info!(version = metadata.version, revision, "Secret updated with new revision");
        Ok(metadata)
    }

    /// Delete a secret with every revision, grant and backend policy naming it
    #[instrument(skip(self, ctx), fields(uri = %uri, backend = %self.model.backend))]
    pub async fn delete_secret(&self, ctx: &RequestContext, uri: &SecretUri) -> Result<()> {
        let metadata = match self.get_secret(ctx, uri).await {
            Ok(metadata) => metadata,
            Err(e) if e.is_not_found() => {
                self.finish_interrupted_delete(ctx, uri).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let revisions = self
            .retry
            .retry(ctx, "list_revisions", || {
                ctx.run("list_revisions", CallKind::Read, self.metadata.list_revisions(uri))
            })
            .await?;
        ctx.check("delete_secret")?;

        let provider = self.provider()?;
        let store = provider.admin_store(ctx, &self.model).await?;

        match store.staging() {
            Some(staging) => {
                let ops: Vec<TxnOp> = revisions.iter().flat_map(|r| staging.delete_ops(&r.address)).collect();
                ctx.run("delete_secret", CallKind::Write, self.metadata.delete_secret(uri, ops)).await?;
            }
            None => {
                for revision in &revisions {
                    store.delete_content(ctx, &revision.address).await?;
                }
                ctx.run("delete_secret", CallKind::Write, self.metadata.delete_secret(uri, Vec::new())).await?;
            }
        }

        provider
            .cleanup_secrets(ctx, &self.model, Some(&metadata.owner_tag), std::slice::from_ref(uri))
            .await?;

        info!(revisions = revisions.len(), "Secret deleted");
        Ok(())
    }

    /// Prune backend policies left behind when a delete failed after its
    /// metadata was gone.
    async fn finish_interrupted_delete(&self, ctx: &RequestContext, uri: &SecretUri) -> Result<()> {
        let tombstoned = self
            .retry
            .retry(ctx, "is_tombstoned", || {
                ctx.run("is_tombstoned", CallKind::Read, self.metadata.is_tombstoned(uri))
            })
            .await?;
        if !tombstoned {
            return Ok(());
        }
        self.provider()?.cleanup_secrets(ctx, &self.model, None, std::slice::from_ref(uri)).await?;
        debug!("Pruned policies of previously deleted secret");
        Ok(())
    }

    /// Let `subject` read `uri`
    #[instrument(skip(self, ctx), fields(uri = %uri, subject = %subject))]
    pub async fn grant_access(&self, ctx: &RequestContext, uri: &SecretUri, subject: &EntityTag) -> Result<()> {
        ctx.run("grant_access", CallKind::Write, self.metadata.grant_access(uri, subject)).await?;
        debug!("Secret access granted");
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(uri = %uri, subject = %subject))]
    pub async fn revoke_access(&self, ctx: &RequestContext, uri: &SecretUri, subject: &EntityTag) -> Result<()> {
        ctx.run("revoke_access", CallKind::Write, self.metadata.revoke_access(uri, subject)).await?;
        debug!("Secret access revoked");
        Ok(())
    }

    /// Mint a content store config scoped to what `tag` owns and consumes
    #[instrument(skip(self, ctx), fields(tag = %tag, backend = %self.model.backend))]
    pub async fn agent_store_config(&self, ctx: &RequestContext, tag: &EntityTag) -> Result<StoreConfig> {
        let owned = self
            .retry
            .retry(ctx, "owned_by", || ctx.run("owned_by", CallKind::Read, self.metadata.owned_by(tag)))
            .await?;
        let consumed = self
            .retry
            .retry(ctx, "consumed_by", || ctx.run("consumed_by", CallKind::Read, self.metadata.consumed_by(tag)))
            .await?;
        debug!(owned = owned.len(), consumed = consumed.len(), "Computed agent secret access");

        self.provider()?.store_config(ctx, &self.model, Some(tag), &owned, &consumed).await
    }

    /// Mint a config that can read every secret of the model
    #[instrument(skip(self, ctx), fields(backend = %self.model.backend))]
    pub async fn admin_store_config(&self, ctx: &RequestContext) -> Result<StoreConfig> {
        let none = SecretRevisions::new();
        self.provider()?.store_config(ctx, &self.model, None, &none, &none).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::error::ErrorKind;
    use crate::secrets::params::{DefaultsParams, ParamKind};
    use crate::secrets::provider::InternalProvider;
    use crate::storage::MemoryDocumentStore;
    use serde_json::json;
    use uuid::Uuid;

    fn service() -> (SecretsService, Arc<MemoryDocumentStore>) {
        let docs = Arc::new(MemoryDocumentStore::new());
        let registry = ProviderRegistry::new().with_provider(Arc::new(InternalProvider::new(docs.clone())));
        let model = ModelInfo::new(Uuid::new_v4(), Uuid::new_v4(), "test");
        (SecretsService::for_model(Arc::new(registry), docs.clone(), model), docs)
    }

    fn owner() -> EntityTag {
        EntityTag::application("mysql").unwrap()
    }

    #[tokio::test]
    async fn test_create_and_read_value() {
        let (service, docs) = service();
        let ctx = RequestContext::new();
        let uri = SecretUri::generate();

        let params = CreateParams::new(owner(), SecretValue::new([("key", "v1")])).with_label("db");
        let metadata = service.create_secret(&ctx, &uri, &params).await.unwrap();
        assert_eq!(metadata.label.as_deref(), Some("db"));
        assert_eq!(docs.count("secretContent").await, 1);

        let value = service.get_secret_value(&ctx, &uri, None).await.unwrap();
        assert_eq!(value.get("key").unwrap().as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_create_failure_writes_no_content() {
        let (service, docs) = service();
        let ctx = RequestContext::new();
        let uri = SecretUri::generate();
        let params = CreateParams::new(owner(), SecretValue::new([("key", "v1")]));
        service.create_secret(&ctx, &uri, &params).await.unwrap();

        let err = service.create_secret(&ctx, &uri, &params).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(docs.count("secretContent").await, 1);
    }

    #[tokio::test]
    async fn test_update_appends_revision() {
        let (service, _) = service();
        let ctx = RequestContext::new();
        let uri = SecretUri::new("secret1").unwrap();
        service
            .create_secret(&ctx, &uri, &CreateParams::new(owner(), SecretValue::new([("key", "v1")])))
            .await
            .unwrap();

        let updated = service
            .update_secret(&ctx, &uri, &UpdateParams::with_data(SecretValue::new([("key", "v2")])))
            .await
            .unwrap();
        assert_eq!(updated.latest_revision, 1);

        let v0 = service.get_secret_value(&ctx, &uri, Some(0)).await.unwrap();
        let v1 = service.get_secret_value(&ctx, &uri, Some(1)).await.unwrap();
        assert_eq!(v0.get("key").unwrap().as_deref(), Some("v1"));
        assert_eq!(v1.get("key").unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_update_merges_params() {
        let (service, _) = service();
        let service = service.with_params_validator(Arc::new(
            DefaultsParams::new()
                .option("max-versions", ParamKind::Int, Some(json!(10)))
                .option("cas", ParamKind::Bool, None),
        ));
        let ctx = RequestContext::new();
        let uri = SecretUri::generate();

        let mut params = CreateParams::new(owner(), SecretValue::new([("key", "v")]));
        params.params.insert("cas".to_string(), json!("true"));
        let created = service.create_secret(&ctx, &uri, &params).await.unwrap();
        assert_eq!(created.params.get("max-versions"), Some(&json!(10)));
        assert_eq!(created.params.get("cas"), Some(&json!(true)));

        let update = UpdateParams {
            params: Some([("cas".to_string(), json!(""))].into_iter().collect()),
            ..Default::default()
        };
        let updated = service.update_secret(&ctx, &uri, &update).await.unwrap();
        assert!(!updated.params.contains_key("cas"));
        assert_eq!(updated.params.get("max-versions"), Some(&json!(10)));
        assert_eq!(updated.latest_revision, 0);
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let (service, docs) = service();
        let ctx = RequestContext::new();
        let uri = SecretUri::generate();
        service
            .create_secret(&ctx, &uri, &CreateParams::new(owner(), SecretValue::new([("key", "v")])))
            .await
            .unwrap();
        service
            .update_secret(&ctx, &uri, &UpdateParams::with_data(SecretValue::new([("key", "w")])))
            .await
            .unwrap();

        service.delete_secret(&ctx, &uri).await.unwrap();
        assert_eq!(docs.count("secretContent").await, 0);
        assert!(service.get_secret_value(&ctx, &uri, Some(0)).await.unwrap_err().is_not_found());
        assert!(service.delete_secret(&ctx, &uri).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_cancelled_context_is_not_applied() {
        let (service, docs) = service();
        let ctx = RequestContext::new();
        ctx.cancel();

        let params = CreateParams::new(owner(), SecretValue::new([("key", "v")]));
        let err = service.create_secret(&ctx, &SecretUri::generate(), &params).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(docs.count("secrets").await, 0);
    }

    #[tokio::test]
    async fn test_agent_store_config_for_internal_backend() {
        let (service, _) = service();
        let ctx = RequestContext::new();
        let config = service.agent_store_config(&ctx, &owner()).await.unwrap();
        assert!(config.vault.is_none());
        assert_eq!(config.model_uuid, service.model().uuid);
    }
}
