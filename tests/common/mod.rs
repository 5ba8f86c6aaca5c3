//! Common test utilities for all integration tests.
//!
//! Builds secrets services over an in-memory document store, backed either by
//! the in-process provider or by an in-process vault.

#![allow(dead_code)]

use std::sync::Arc;
use uuid::Uuid;

use strongroom::secrets::provider::vault::MemoryVault;
use strongroom::secrets::{
    EntityTag, InternalProvider, ModelInfo, ProviderKind, ProviderRegistry, RequestContext, RetryPolicy,
    SecretValue, SecretsService, VaultProvider,
};
use strongroom::storage::{DocumentStore, MemoryDocumentStore};

pub const ROOT_TOKEN: &str = "root-token";

/// A model whose backend is `vault`.
pub fn vault_model(vault: &MemoryVault) -> ModelInfo {
    let config = format!(
        "endpoint: http://127.0.0.1:8200\ntoken: {}\n",
        vault.root_token()
    );
    ModelInfo::new(Uuid::new_v4(), Uuid::new_v4(), "test").with_backend(ProviderKind::Vault, Some(config))
}

pub fn vault_provider(vault: &MemoryVault) -> VaultProvider {
    VaultProvider::new(Arc::new(vault.clone())).with_retry_policy(RetryPolicy::none())
}

pub struct TestEnv {
    pub docs: Arc<MemoryDocumentStore>,
    pub vault: MemoryVault,
    pub registry: Arc<ProviderRegistry>,
}

impl TestEnv {
    pub fn new() -> Self {
        let docs = Arc::new(MemoryDocumentStore::new());
        let vault = MemoryVault::new(ROOT_TOKEN);
        let registry = ProviderRegistry::new()
            .with_provider(Arc::new(InternalProvider::new(docs.clone())))
            .with_provider(Arc::new(vault_provider(&vault)));
        Self { docs, vault, registry: Arc::new(registry) }
    }

    pub fn service(&self, model: ModelInfo) -> SecretsService {
        let store: Arc<dyn DocumentStore> = self.docs.clone();
        SecretsService::for_model(self.registry.clone(), store, model).with_retry_policy(RetryPolicy::none())
    }

    pub fn internal_service(&self) -> SecretsService {
        self.service(ModelInfo::new(Uuid::new_v4(), Uuid::new_v4(), "test"))
    }

    /// A vault-backed service whose model namespace is already provisioned.
    pub async fn vault_service(&self) -> SecretsService {
        let service = self.service(vault_model(&self.vault));
        service.initialise_model(&RequestContext::new()).await.expect("initialise model");
        service
    }
}

pub fn value(pairs: &[(&str, &str)]) -> SecretValue {
    SecretValue::new(pairs.iter().copied())
}

pub fn tag(s: &str) -> EntityTag {
    s.parse().expect("valid entity tag")
}
