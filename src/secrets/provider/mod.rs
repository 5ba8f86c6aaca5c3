//! Secret backend providers.
//!
//! A provider owns one backend kind: it provisions and tears down per-model
//! namespaces, builds [`ContentStore`] clients, and mints [`StoreConfig`]
//! credentials scoped to what an agent owns and consumes.

pub mod internal;
pub mod registry;
pub mod store_config;
pub mod vault;

pub use internal::InternalProvider;
pub use registry::ProviderRegistry;
pub use store_config::{StoreConfig, VaultConnection};
pub use vault::VaultProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use super::content::ContentStore;
use super::context::RequestContext;
use super::error::{Result, SecretsError};
use super::metadata::SecretRevisions;
use super::tag::EntityTag;
use super::uri::SecretUri;

/// Closed set of backend kinds, persisted as a string tag in model config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Content stored alongside metadata in the controller's document store
    Internal,
    /// HashiCorp Vault KV v1, one mount per model
    Vault,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Vault => "vault",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = SecretsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "internal" => Ok(Self::Internal),
            "vault" => Ok(Self::Vault),
            _ => Err(SecretsError::config_error(format!("Unknown secret backend type: {}", s))),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The model a provider call acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub uuid: Uuid,
    pub controller_uuid: Uuid,
    pub name: String,
    pub backend: ProviderKind,
    /// Administrative backend configuration (JSON or YAML), when the backend needs one.
    pub backend_config: Option<String>,
}

impl ModelInfo {
    pub fn new(uuid: Uuid, controller_uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid,
            controller_uuid,
            name: name.into(),
            backend: ProviderKind::Internal,
            backend_config: None,
        }
    }

    pub fn with_backend(mut self, backend: ProviderKind, config: Option<String>) -> Self {
        self.backend = backend;
        self.backend_config = config;
        self
    }

    pub fn tag(&self) -> EntityTag {
        EntityTag::model(self.uuid)
    }
}

/// Lifecycle and credential management for one backend kind.
#[async_trait]
pub trait SecretBackendProvider: Send + Sync + fmt::Debug {
    fn kind(&self) -> ProviderKind;

    /// Provision the model namespace. Idempotent.
    async fn initialise(&self, ctx: &RequestContext, model: &ModelInfo) -> Result<()>;

    /// Remove every policy and content key belonging to the model. Idempotent.
    async fn cleanup_model(&self, ctx: &RequestContext, model: &ModelInfo) -> Result<()>;

    /// Remove access policies naming any of `removed`. Idempotent.
    async fn cleanup_secrets(
        &self,
        ctx: &RequestContext,
        model: &ModelInfo,
        tag: Option<&EntityTag>,
        removed: &[SecretUri],
    ) -> Result<()>;

    /// Mint a config whose credential grants exactly what `tag` needs.
    ///
    /// `tag == None` requests administrator (read-everything) access.
    async fn store_config(
        &self,
        ctx: &RequestContext,
        model: &ModelInfo,
        tag: Option<&EntityTag>,
        owned: &SecretRevisions,
        consumed: &SecretRevisions,
    ) -> Result<StoreConfig>;

    /// Build a content store client from a (possibly minted) config.
    fn new_store(&self, config: &StoreConfig) -> Result<Arc<dyn ContentStore>>;

    /// Content store bound to the administrative credential.
    async fn admin_store(&self, ctx: &RequestContext, model: &ModelInfo) -> Result<Arc<dyn ContentStore>>;

    async fn health_check(&self, ctx: &RequestContext, model: &ModelInfo) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_roundtrip() {
        for kind in [ProviderKind::Internal, ProviderKind::Vault] {
            let parsed: ProviderKind = kind.as_str().parse().unwrap();
            assert_eq!(kind, parsed);
        }
        assert!("kubernetes".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_provider_kind_serialization() {
        let json = serde_json::to_string(&ProviderKind::Vault).unwrap();
        assert_eq!(json, "\"vault\"");
        let parsed: ProviderKind = serde_json::from_str("\"internal\"").unwrap();
        assert_eq!(parsed, ProviderKind::Internal);
    }

    #[test]
    fn test_model_info_tag() {
        let uuid = Uuid::new_v4();
        let model = ModelInfo::new(uuid, Uuid::new_v4(), "prod");
        assert_eq!(model.tag().to_string(), format!("model-{}", uuid));
        assert_eq!(model.backend, ProviderKind::Internal);
    }
}
