//! Provider registry
//!
//! Maps each [`ProviderKind`] to its provider. Selection is a plain lookup on
//! the closed kind enum.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::{ProviderKind, SecretBackendProvider};
use crate::secrets::error::{Result, SecretsError};

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn SecretBackendProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.registered_kinds())
            .finish()
    }
}

impl ProviderRegistry {
    /// Create a new registry with no providers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous provider of the same kind
    pub fn register(&mut self, provider: Arc<dyn SecretBackendProvider>) {
        let kind = provider.kind();
        info!(backend_type = %kind, "Registering secret backend provider");
        self.providers.insert(kind, provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn SecretBackendProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn has_provider(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    /// Registered kinds, sorted by tag
    pub fn registered_kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn SecretBackendProvider>> {
        self.providers.get(&kind).cloned().ok_or_else(|| {
            SecretsError::config_error(format!("Secret backend '{}' is not configured", kind))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::provider::InternalProvider;
    use crate::storage::MemoryDocumentStore;

    #[test]
    fn test_register_and_get() {
        let store = Arc::new(MemoryDocumentStore::new());
        let registry = ProviderRegistry::new().with_provider(Arc::new(InternalProvider::new(store)));

        assert!(registry.has_provider(ProviderKind::Internal));
        assert!(!registry.has_provider(ProviderKind::Vault));
        assert_eq!(registry.get(ProviderKind::Internal).unwrap().kind(), ProviderKind::Internal);

        let err = registry.get(ProviderKind::Vault).unwrap_err();
        assert!(err.to_string().contains("vault"));
    }

    #[test]
    fn test_debug_lists_kinds() {
        let store = Arc::new(MemoryDocumentStore::new());
        let registry = ProviderRegistry::new().with_provider(Arc::new(InternalProvider::new(store)));
        assert!(format!("{:?}", registry).contains("Internal"));
    }
}
