//! In-process backend: content stored in the controller's document store.
//!
//! Content documents live in the `secretContent` collection, keyed by
//! `<model-uuid>:<address>`. Because the metadata catalog uses the same
//! store, the content store offers [`StagedContent`] and create/delete run as
//! a single transaction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{ModelInfo, ProviderKind, SecretBackendProvider, StoreConfig};
use crate::observability::metrics;
use crate::secrets::content::{ContentStore, StagedContent};
use crate::secrets::context::{CallKind, RequestContext};
use crate::secrets::error::{Result, SecretsError};
use crate::secrets::metadata::SecretRevisions;
use crate::secrets::tag::EntityTag;
use crate::secrets::uri::SecretUri;
use crate::secrets::value::SecretValue;
use crate::storage::{DocumentStore, Filter, TxnOp};

pub const CONTENT_COLLECTION: &str = "secretContent";

#[derive(Debug, Serialize, Deserialize)]
struct ContentDoc {
    model_uuid: Uuid,
    address: String,
    data: BTreeMap<String, String>,
    checksum: String,
}

fn content_id(model_uuid: &Uuid, address: &str) -> String {
    format!("{}:{}", model_uuid, address)
}

#[derive(Debug, Clone)]
pub struct InternalProvider {
    store: Arc<dyn DocumentStore>,
}

impl InternalProvider {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn content_store(&self, model_uuid: Uuid) -> Arc<dyn ContentStore> {
        Arc::new(InternalContentStore::new(self.store.clone(), model_uuid))
    }
}

#[async_trait]
impl SecretBackendProvider for InternalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Internal
    }

    async fn initialise(&self, _ctx: &RequestContext, _model: &ModelInfo) -> Result<()> {
        Ok(())
    }

    #[instrument(skip(self, ctx, model), fields(model_uuid = %model.uuid))]
    async fn cleanup_model(&self, ctx: &RequestContext, model: &ModelInfo) -> Result<()> {
        let filter = Filter::new().eq("model_uuid", model.uuid.to_string());
        let docs = ctx
            .run("find_model_content", CallKind::Read, async {
                Ok(self.store.find(CONTENT_COLLECTION, &filter).await?)
            })
            .await?;
        if docs.is_empty() {
            return Ok(());
        }

        let count = docs.len();
        let ops = docs.into_iter().map(|doc| TxnOp::delete(CONTENT_COLLECTION, doc.id)).collect();
        ctx.run("cleanup_model", CallKind::Write, async { Ok(self.store.run_transaction(ops).await?) })
            .await?;
        info!(removed = count, "Removed model secret content");
        Ok(())
    }

    async fn cleanup_secrets(
        &self,
        _ctx: &RequestContext,
        _model: &ModelInfo,
        _tag: Option<&EntityTag>,
        _removed: &[SecretUri],
    ) -> Result<()> {
        Ok(())
    }

    async fn store_config(
        &self,
        _ctx: &RequestContext,
        model: &ModelInfo,
        _tag: Option<&EntityTag>,
        _owned: &SecretRevisions,
        _consumed: &SecretRevisions,
    ) -> Result<StoreConfig> {
        Ok(StoreConfig::internal(model.uuid, model.controller_uuid))
    }

    fn new_store(&self, config: &StoreConfig) -> Result<Arc<dyn ContentStore>> {
        if config.kind != ProviderKind::Internal {
            return Err(SecretsError::config_error(format!(
                "internal provider cannot open a {} store",
                config.kind
            )));
        }
        Ok(self.content_store(config.model_uuid))
    }

    async fn admin_store(&self, _ctx: &RequestContext, model: &ModelInfo) -> Result<Arc<dyn ContentStore>> {
        Ok(self.content_store(model.uuid))
    }

    async fn health_check(&self, ctx: &RequestContext, model: &ModelInfo) -> Result<()> {
        let id = content_id(&model.uuid, "health");
        ctx.run("health_check", CallKind::Read, async {
            self.store.get(CONTENT_COLLECTION, &id).await?;
            Ok(())
        })
        .await
    }
}

/// Content store over the shared document store, scoped to one model.
#[derive(Debug, Clone)]
pub struct InternalContentStore {
    store: Arc<dyn DocumentStore>,
    model_uuid: Uuid,
}

impl InternalContentStore {
    pub fn new(store: Arc<dyn DocumentStore>, model_uuid: Uuid) -> Self {
        Self { store, model_uuid }
    }

    async fn observe<T>(&self, operation: &str, started: Instant, result: Result<T>) -> Result<T> {
        metrics::record_content_operation(
            ProviderKind::Internal.as_str(),
            operation,
            started.elapsed().as_secs_f64(),
            result.is_ok(),
        )
        .await;
        result
    }
}

#[async_trait]
impl ContentStore for InternalContentStore {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Internal
    }

    #[instrument(skip(self, ctx), fields(model_uuid = %self.model_uuid))]
    async fn get_content(&self, ctx: &RequestContext, address: &str) -> Result<SecretValue> {
        let started = Instant::now();
        let id = content_id(&self.model_uuid, address);
        let result = ctx
            .run("get_content", CallKind::Read, async {
                let body = self
                    .store
                    .get(CONTENT_COLLECTION, &id)
                    .await?
                    .ok_or_else(|| SecretsError::not_found("secret content", address))?;
                let doc: ContentDoc = serde_json::from_value(body)?;
                let value = SecretValue::from_encoded(doc.data)?;
                if value.checksum() != doc.checksum {
                    return Err(SecretsError::internal(format!(
                        "checksum mismatch for secret content {}",
                        address
                    )));
                }
                Ok(value)
            })
            .await;
        self.observe("get_content", started, result).await
    }

    #[instrument(skip(self, ctx, value), fields(model_uuid = %self.model_uuid, uri = %uri))]
    async fn save_content(
        &self,
        ctx: &RequestContext,
        uri: &SecretUri,
        revision: u32,
        value: &SecretValue,
    ) -> Result<String> {
        let started = Instant::now();
        let (address, ops) = self.save_ops(uri, revision, value)?;
        let result = ctx
            .run("save_content", CallKind::Write, async { Ok(self.store.run_transaction(ops).await?) })
            .await
            .map(|_| address);
        debug!(ok = result.is_ok(), "Saved secret content");
        self.observe("save_content", started, result).await
    }

    #[instrument(skip(self, ctx), fields(model_uuid = %self.model_uuid))]
    async fn delete_content(&self, ctx: &RequestContext, address: &str) -> Result<()> {
        let started = Instant::now();
        let ops = self.delete_ops(address);
        let result = ctx
            .run("delete_content", CallKind::Write, async { Ok(self.store.run_transaction(ops).await?) })
            .await;
        self.observe("delete_content", started, result).await
    }

    fn staging(&self) -> Option<&dyn StagedContent> {
        Some(self)
    }
}

impl StagedContent for InternalContentStore {
    fn save_ops(&self, uri: &SecretUri, revision: u32, value: &SecretValue) -> Result<(String, Vec<TxnOp>)> {
        let address = uri.name(revision);
        let doc = ContentDoc {
            model_uuid: self.model_uuid,
            address: address.clone(),
            data: value.encoded_values().clone(),
            checksum: value.checksum(),
        };
        let op = TxnOp::insert(
            CONTENT_COLLECTION,
            content_id(&self.model_uuid, &address),
            serde_json::to_value(&doc)?,
        );
        Ok((address, vec![op]))
    }

    fn delete_ops(&self, address: &str) -> Vec<TxnOp> {
        vec![TxnOp::delete(CONTENT_COLLECTION, content_id(&self.model_uuid, address))]
    }
}
