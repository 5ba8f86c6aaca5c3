//! Integration tests for the vault backend: credential scoping, token expiry,
//! policy cleanup and partial-write reporting.

mod common;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{tag, value, vault_model, vault_provider, TestEnv};
use strongroom::secrets::provider::vault::{
    MemoryVault, TokenRequest, VaultApi, VaultConnector, DEFAULT_TOKEN_TTL,
};
use strongroom::secrets::{
    CreateParams, ErrorKind, ProviderRegistry, RequestContext, RetryPolicy, SecretBackendProvider, SecretString,
    SecretUri, SecretsError, SecretsService, UpdateParams, VaultConnection, VaultProvider,
};
use strongroom::storage::MemoryDocumentStore;
use tracing_test::traced_test;

type VaultResult<T> = strongroom::secrets::Result<T>;

/// Wraps a [`MemoryVault`], counting content reads and failing the next `n`
/// policy listings.
#[derive(Debug, Clone)]
struct FlakyVault {
    vault: MemoryVault,
    failures: Arc<AtomicU32>,
    reads: Arc<AtomicU32>,
}

impl FlakyVault {
    fn new(vault: MemoryVault) -> Self {
        Self { vault, failures: Arc::new(AtomicU32::new(0)), reads: Arc::new(AtomicU32::new(0)) }
    }

    fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

impl VaultConnector for FlakyVault {
    fn connect(&self, connection: &VaultConnection) -> VaultResult<Arc<dyn VaultApi>> {
        Ok(Arc::new(FlakyClient {
            inner: self.vault.connect(connection)?,
            failures: self.failures.clone(),
            reads: self.reads.clone(),
        }))
    }
}

struct FlakyClient {
    inner: Arc<dyn VaultApi>,
    failures: Arc<AtomicU32>,
    reads: Arc<AtomicU32>,
}

#[async_trait]
impl VaultApi for FlakyClient {
    async fn mount_kv1(&self, path: &str) -> VaultResult<()> {
        self.inner.mount_kv1(path).await
    }

    async fn list_policies(&self) -> VaultResult<Vec<String>> {
        let failing = self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok();
        if failing {
            return Err(SecretsError::unavailable("connection reset by peer"));
        }
        self.inner.list_policies().await
    }

    async fn put_policy(&self, name: &str, hcl: &str) -> VaultResult<()> {
        self.inner.put_policy(name, hcl).await
    }

    async fn delete_policy(&self, name: &str) -> VaultResult<()> {
        self.inner.delete_policy(name).await
    }

    async fn create_token(&self, request: &TokenRequest) -> VaultResult<SecretString> {
        self.inner.create_token(request).await
    }

    async fn kv_get(&self, mount: &str, path: &str) -> VaultResult<BTreeMap<String, String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.kv_get(mount, path).await
    }

    async fn kv_put(&self, mount: &str, path: &str, data: &BTreeMap<String, String>) -> VaultResult<()> {
        self.inner.kv_put(mount, path, data).await
    }

    async fn kv_delete(&self, mount: &str, path: &str) -> VaultResult<()> {
        self.inner.kv_delete(mount, path).await
    }

    async fn kv_list(&self, mount: &str, path: &str) -> VaultResult<Vec<String>> {
        self.inner.kv_list(mount, path).await
    }

    async fn unseal(&self, key: &SecretString) -> VaultResult<bool> {
        self.inner.unseal(key).await
    }

    async fn health(&self) -> VaultResult<()> {
        self.inner.health().await
    }
}

#[tokio::test]
async fn test_agent_credential_is_scoped_to_owned_and_consumed() {
    let env = TestEnv::new();
    let service = env.vault_service().await;
    let ctx = RequestContext::new();

    let (a, b, c) = (SecretUri::generate(), SecretUri::generate(), SecretUri::generate());
    let agent = tag("unit-mysql-0");
    service.create_secret(&ctx, &a, &CreateParams::new(agent.clone(), value(&[("key", "a")]))).await.unwrap();
    service
        .create_secret(&ctx, &b, &CreateParams::new(tag("application-redis"), value(&[("key", "b")])))
        .await
        .unwrap();
    service
        .create_secret(&ctx, &c, &CreateParams::new(tag("application-other"), value(&[("key", "c")])))
        .await
        .unwrap();
    service.grant_access(&ctx, &b, &agent).await.unwrap();

    let config = service.agent_store_config(&ctx, &agent).await.unwrap();
    let token = config.vault_connection().unwrap().token.expose_secret().to_string();
    assert_ne!(token, common::ROOT_TOKEN);
    let store = vault_provider(&env.vault).new_store(&config).unwrap();

    // Create anywhere in the model namespace
    let d = SecretUri::generate();
    store.save_content(&ctx, &d, 0, &value(&[("key", "d")])).await.unwrap();

    // Full rights on the owned secret
    assert!(store.get_content(&ctx, &a.name(0)).await.is_ok());
    store.save_content(&ctx, &a, 1, &value(&[("key", "a1")])).await.unwrap();
    store.delete_content(&ctx, &a.name(1)).await.unwrap();

    // Read-only on the consumed secret
    let read = store.get_content(&ctx, &b.name(0)).await.unwrap();
    assert_eq!(read.get("key").unwrap().as_deref(), Some("b"));
    let err = store.save_content(&ctx, &b, 1, &value(&[("key", "b1")])).await.unwrap_err();
    assert!(err.is_permission_denied());

    // Nothing on the unrelated secret
    let err = store.get_content(&ctx, &c.name(0)).await.unwrap_err();
    assert!(err.is_permission_denied());
}

#[tokio::test]
async fn test_grant_on_prefix_id_does_not_reach_longer_id() {
    let env = TestEnv::new();
    let service = env.vault_service().await;
    let ctx = RequestContext::new();

    assert_eq!(SecretUri::new("abc-def").unwrap_err().kind(), ErrorKind::Validation);

    let agent = tag("unit-mysql-0");
    let mine = SecretUri::new("abc").unwrap();
    let theirs = SecretUri::new("abcdef").unwrap();
    let granted = SecretUri::new("xyz").unwrap();
    let other = SecretUri::new("xyz0").unwrap();
    let stranger = tag("application-other");
    for (uri, owner) in [(&mine, &agent), (&theirs, &stranger), (&granted, &stranger), (&other, &stranger)] {
        service.create_secret(&ctx, uri, &CreateParams::new(owner.clone(), value(&[("key", "v")]))).await.unwrap();
    }
    service.grant_access(&ctx, &granted, &agent).await.unwrap();

    let config = service.agent_store_config(&ctx, &agent).await.unwrap();
    let store = vault_provider(&env.vault).new_store(&config).unwrap();

    assert!(store.get_content(&ctx, &mine.name(0)).await.is_ok());
    assert!(store.get_content(&ctx, &granted.name(0)).await.is_ok());
    for uri in [&theirs, &other] {
        assert!(store.get_content(&ctx, &uri.name(0)).await.unwrap_err().is_permission_denied());
        assert!(store.delete_content(&ctx, &uri.name(0)).await.unwrap_err().is_permission_denied());
    }
}

#[tokio::test]
async fn test_unit_sees_secrets_granted_to_its_application() {
    let env = TestEnv::new();
    let service = env.vault_service().await;
    let ctx = RequestContext::new();

    let uri = SecretUri::generate();
    service
        .create_secret(&ctx, &uri, &CreateParams::new(tag("application-mysql"), value(&[("key", "v")])))
        .await
        .unwrap();
    service.grant_access(&ctx, &uri, &tag("application-wordpress")).await.unwrap();

    let config = service.agent_store_config(&ctx, &tag("wordpress/1")).await.unwrap();
    let store = vault_provider(&env.vault).new_store(&config).unwrap();
    assert!(store.get_content(&ctx, &uri.name(0)).await.is_ok());
}

#[tokio::test]
async fn test_minted_credential_expires() {
    let env = TestEnv::new();
    let service = env.vault_service().await;
    let ctx = RequestContext::new();

    let uri = SecretUri::generate();
    let owner = tag("application-mysql");
    service.create_secret(&ctx, &uri, &CreateParams::new(owner.clone(), value(&[("key", "v")]))).await.unwrap();

    let config = service.agent_store_config(&ctx, &owner).await.unwrap();
    let store = vault_provider(&env.vault).new_store(&config).unwrap();
    assert!(store.get_content(&ctx, &uri.name(0)).await.is_ok());

    env.vault.advance(DEFAULT_TOKEN_TTL + Duration::from_secs(1)).await;
    let err = store.get_content(&ctx, &uri.name(0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn test_concurrent_mints_yield_independent_tokens() {
    let env = TestEnv::new();
    let service = env.vault_service().await;
    let ctx = RequestContext::new();
    let agent = tag("unit-mysql-0");

    let (first, second) =
        tokio::join!(service.agent_store_config(&ctx, &agent), service.agent_store_config(&ctx, &agent));
    let first = first.unwrap();
    let second = second.unwrap();
    assert_ne!(
        first.vault_connection().unwrap().token.expose_secret(),
        second.vault_connection().unwrap().token.expose_secret()
    );
    assert_eq!(env.vault.token_count().await, 2);
}

#[tokio::test]
async fn test_cleanup_secrets_keeps_other_policies() {
    let env = TestEnv::new();
    let service = env.vault_service().await;
    let ctx = RequestContext::new();
    let owner = tag("unit-mysql-0");

    // One id is a prefix of the other
    let a = SecretUri::new("abc").unwrap();
    let b = SecretUri::new("abcdef").unwrap();
    for uri in [&a, &b] {
        service.create_secret(&ctx, uri, &CreateParams::new(owner.clone(), value(&[("key", "v")]))).await.unwrap();
    }

    let config = service.agent_store_config(&ctx, &owner).await.unwrap();
    let uuid = service.model().uuid;
    let policies = env.vault.policy_names().await;
    assert!(policies.contains(&format!("model-{}-abc-owner", uuid)));
    assert!(policies.contains(&format!("model-{}-abcdef-owner", uuid)));

    service.delete_secret(&ctx, &a).await.unwrap();

    let policies = env.vault.policy_names().await;
    assert!(!policies.contains(&format!("model-{}-abc-owner", uuid)));
    assert!(policies.contains(&format!("model-{}-abcdef-owner", uuid)));

    let store = vault_provider(&env.vault).new_store(&config).unwrap();
    assert!(store.get_content(&ctx, &b.name(0)).await.is_ok());
}

#[tokio::test]
async fn test_delete_then_read_fails_not_found() {
    let env = TestEnv::new();
    let service = env.vault_service().await;
    let ctx = RequestContext::new();

    let uri = SecretUri::generate();
    let owner = tag("application-mysql");
    service.create_secret(&ctx, &uri, &CreateParams::new(owner, value(&[("key", "v1")]))).await.unwrap();
    service.update_secret(&ctx, &uri, &UpdateParams::with_data(value(&[("key", "v2")]))).await.unwrap();
    assert_eq!(env.vault.keys(&service.model().uuid.to_string()).await.len(), 2);

    service.delete_secret(&ctx, &uri).await.unwrap();
    assert!(env.vault.keys(&service.model().uuid.to_string()).await.is_empty());

    for revision in [0, 1] {
        let err = service.get_secret_value(&ctx, &uri, Some(revision)).await.unwrap_err();
        assert!(err.is_not_found());
    }
    let err = service.delete_secret(&ctx, &uri).await.unwrap_err();
    assert!(err.is_not_found());

    // The content layer tolerates repeated deletes
    let admin = vault_provider(&env.vault).admin_store(&ctx, service.model()).await.unwrap();
    admin.delete_content(&ctx, &uri.name(0)).await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn test_content_failure_after_metadata_is_inconsistent() {
    let env = TestEnv::new();
    let service = env.vault_service().await;
    let ctx = RequestContext::new();

    env.vault.set_unavailable(true).await;
    let uri = SecretUri::generate();
    let err = service
        .create_secret(&ctx, &uri, &CreateParams::new(tag("application-mysql"), value(&[("key", "v")])))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Inconsistent);
    assert!(logs_contain("Secret metadata written but content write failed"));

    // Metadata survived; content did not
    env.vault.set_unavailable(false).await;
    let metadata = service.get_secret(&ctx, &uri).await.unwrap();
    assert_eq!(metadata.latest_revision, 0);
    assert!(service.get_secret_value(&ctx, &uri, Some(0)).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_cleanup_model_removes_everything() {
    let env = TestEnv::new();
    let service = env.vault_service().await;
    let other = env.vault_service().await;
    let ctx = RequestContext::new();
    let owner = tag("application-mysql");

    for svc in [&service, &other] {
        let uri = SecretUri::generate();
        svc.create_secret(&ctx, &uri, &CreateParams::new(owner.clone(), value(&[("key", "v")]))).await.unwrap();
        svc.agent_store_config(&ctx, &owner).await.unwrap();
    }

    service.cleanup_model(&ctx).await.unwrap();
    service.cleanup_model(&ctx).await.unwrap();

    let prefix = format!("model-{}", service.model().uuid);
    let other_prefix = format!("model-{}", other.model().uuid);
    let policies = env.vault.policy_names().await;
    assert!(!policies.iter().any(|p| p.starts_with(&prefix)));
    assert!(policies.iter().any(|p| p.starts_with(&other_prefix)));
    assert!(env.vault.keys(&service.model().uuid.to_string()).await.is_empty());
    assert_eq!(env.vault.keys(&other.model().uuid.to_string()).await.len(), 1);
}

async fn flaky_service(vault: &MemoryVault, retry: RetryPolicy) -> (FlakyVault, SecretsService) {
    let flaky = FlakyVault::new(vault.clone());
    let provider = VaultProvider::new(Arc::new(flaky.clone())).with_retry_policy(retry);
    let registry = ProviderRegistry::new().with_provider(Arc::new(provider));
    let service =
        SecretsService::for_model(Arc::new(registry), Arc::new(MemoryDocumentStore::new()), vault_model(vault))
            .with_retry_policy(retry);
    service.initialise_model(&RequestContext::new()).await.unwrap();
    (flaky, service)
}

#[tokio::test]
async fn test_retried_delete_prunes_policies_left_by_failed_attempt() {
    let vault = MemoryVault::new(common::ROOT_TOKEN);
    let (flaky, service) = flaky_service(&vault, RetryPolicy::none()).await;
    let ctx = RequestContext::new();

    let uri = SecretUri::generate();
    let owner = tag("application-mysql");
    service.create_secret(&ctx, &uri, &CreateParams::new(owner.clone(), value(&[("key", "v")]))).await.unwrap();
    service.agent_store_config(&ctx, &owner).await.unwrap();
    let policy = format!("model-{}-{}-owner", service.model().uuid, uri.id());
    assert!(vault.policy_names().await.contains(&policy));

    flaky.fail_next(1);
    let err = service.delete_secret(&ctx, &uri).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert!(vault.policy_names().await.contains(&policy));

    let err = service.delete_secret(&ctx, &uri).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(!vault.policy_names().await.contains(&policy));
}

#[tokio::test]
async fn test_failing_content_read_is_retried_once_over() {
    let vault = MemoryVault::new(common::ROOT_TOKEN);
    let retry = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    };
    let (flaky, service) = flaky_service(&vault, retry).await;
    let ctx = RequestContext::new();

    let uri = SecretUri::generate();
    service
        .create_secret(&ctx, &uri, &CreateParams::new(tag("application-mysql"), value(&[("key", "v")])))
        .await
        .unwrap();

    vault.set_unavailable(true).await;
    let err = service.get_secret_value(&ctx, &uri, Some(0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert_eq!(flaky.reads(), 3);
}
