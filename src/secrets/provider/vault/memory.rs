//! In-process vault for development and tests.
//!
//! Enforces the subset of vault semantics the provider depends on: KV v1
//! mounts, policy evaluation (exact path beats the longest glob prefix),
//! child tokens with a TTL, and seal state. Time is a manual clock so token
//! expiry can be exercised without sleeping.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::api::{TokenRequest, VaultApi, VaultConnector};
use super::policy::{parse_rules, Capability, PathRule};
use crate::secrets::error::{Result, SecretsError};
use crate::secrets::provider::store_config::VaultConnection;
use crate::secrets::types::SecretString;

type Mount = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug)]
struct TokenEntry {
    policies: Vec<String>,
    expires_at: Duration,
}

#[derive(Debug, Default)]
struct SealState {
    sealed: bool,
    keys: BTreeSet<String>,
    threshold: usize,
    provided: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct State {
    mounts: BTreeMap<String, Mount>,
    policies: BTreeMap<String, String>,
    tokens: HashMap<String, TokenEntry>,
    seal: SealState,
    clock: Duration,
    unavailable: bool,
}

/// Shared in-process vault server. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryVault {
    root_token: String,
    state: Arc<Mutex<State>>,
}

impl MemoryVault {
    pub fn new(root_token: impl Into<String>) -> Self {
        Self { root_token: root_token.into(), state: Arc::new(Mutex::new(State::default())) }
    }

    pub fn root_token(&self) -> &str {
        &self.root_token
    }

    /// Client bound to `token`.
    pub fn client(&self, token: impl Into<String>) -> Arc<dyn VaultApi> {
        Arc::new(MemoryVaultClient { vault: self.clone(), token: token.into() })
    }

    /// Move the clock forward, expiring tokens whose TTL has passed.
    pub async fn advance(&self, by: Duration) {
        self.state.lock().await.clock += by;
    }

    /// Seal the vault. `threshold` distinct shares from `keys` unseal it.
    pub async fn seal(&self, keys: &[&str], threshold: usize) {
        let mut state = self.state.lock().await;
        state.seal = SealState {
            sealed: true,
            keys: keys.iter().map(|k| k.to_string()).collect(),
            threshold,
            provided: BTreeSet::new(),
        };
    }

    pub async fn is_sealed(&self) -> bool {
        self.state.lock().await.seal.sealed
    }

    /// Simulate the server becoming unreachable.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    pub async fn policy_names(&self) -> Vec<String> {
        self.state.lock().await.policies.keys().cloned().collect()
    }

    pub async fn policy(&self, name: &str) -> Option<String> {
        self.state.lock().await.policies.get(name).cloned()
    }

    pub async fn mounts(&self) -> Vec<String> {
        self.state.lock().await.mounts.keys().cloned().collect()
    }

    pub async fn keys(&self, mount: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .mounts
            .get(mount)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn token_count(&self) -> usize {
        self.state.lock().await.tokens.len()
    }
}

impl VaultConnector for MemoryVault {
    fn connect(&self, connection: &VaultConnection) -> Result<Arc<dyn VaultApi>> {
        Ok(self.client(connection.token.expose_secret()))
    }
}

struct MemoryVaultClient {
    vault: MemoryVault,
    token: String,
}

impl MemoryVaultClient {
    fn is_root(&self) -> bool {
        self.token == self.vault.root_token
    }

    fn reachable(state: &State) -> Result<()> {
        if state.unavailable {
            return Err(SecretsError::unavailable("connection refused"));
        }
        Ok(())
    }

    fn ready(state: &State) -> Result<()> {
        Self::reachable(state)?;
        if state.seal.sealed {
            return Err(SecretsError::unavailable("Vault is sealed"));
        }
        Ok(())
    }

    fn require_root(&self, state: &State, operation: &str) -> Result<()> {
        Self::ready(state)?;
        if !self.is_root() {
            return Err(SecretsError::permission_denied(format!("{}: permission denied", operation)));
        }
        Ok(())
    }

    /// Check `capability` on `path` for this client's token.
    fn authorize(&self, state: &State, path: &str, capability: Capability) -> Result<()> {
        Self::ready(state)?;
        if self.is_root() {
            return Ok(());
        }
        let denied = || SecretsError::permission_denied(format!("1 error occurred: permission denied on {}", path));

        let entry = self.token_entry(state)?;
        let rules: Vec<PathRule> = entry
            .policies
            .iter()
            .filter_map(|name| state.policies.get(name))
            .filter_map(|hcl| parse_rules(hcl).ok())
            .flatten()
            .filter(|rule| rule.matches(path))
            .collect();

        let exact: Vec<&PathRule> = rules.iter().filter(|r| !r.is_glob()).collect();
        let winning: Vec<&PathRule> = if !exact.is_empty() {
            exact
        } else {
            let longest = rules.iter().map(|r| r.path.len()).max().ok_or_else(denied)?;
            rules.iter().filter(|r| r.path.len() == longest).collect()
        };

        if winning.iter().any(|r| r.capabilities.contains(&capability)) {
            Ok(())
        } else {
            Err(denied())
        }
    }

    fn token_entry<'a>(&self, state: &'a State) -> Result<&'a TokenEntry> {
        match state.tokens.get(&self.token) {
            Some(entry) if entry.expires_at > state.clock => Ok(entry),
            _ => Err(SecretsError::permission_denied("permission denied: invalid or expired token")),
        }
    }

    fn full_path(mount: &str, path: &str) -> String {
        format!("{}/{}", mount, path)
    }
}

#[async_trait]
impl VaultApi for MemoryVaultClient {
    async fn mount_kv1(&self, path: &str) -> Result<()> {
        let mut state = self.vault.state.lock().await;
        self.require_root(&state, "mount_kv1")?;
        if state.mounts.contains_key(path) {
            return Err(SecretsError::already_exists("mount", path));
        }
        state.mounts.insert(path.to_string(), Mount::new());
        Ok(())
    }

    async fn list_policies(&self) -> Result<Vec<String>> {
        let state = self.vault.state.lock().await;
        self.require_root(&state, "list_policies")?;
        Ok(state.policies.keys().cloned().collect())
    }

    async fn put_policy(&self, name: &str, hcl: &str) -> Result<()> {
        let mut state = self.vault.state.lock().await;
        self.require_root(&state, "put_policy")?;
        parse_rules(hcl)?;
        state.policies.insert(name.to_string(), hcl.to_string());
        Ok(())
    }

    async fn delete_policy(&self, name: &str) -> Result<()> {
        let mut state = self.vault.state.lock().await;
        self.require_root(&state, "delete_policy")?;
        state.policies.remove(name);
        Ok(())
    }

    async fn create_token(&self, request: &TokenRequest) -> Result<SecretString> {
        let mut state = self.vault.state.lock().await;
        self.require_root(&state, "create_token")?;

        let mut policies = request.policies.clone();
        if !request.no_default_policy {
            policies.push("default".to_string());
        }
        let token = format!("hvs.{}", uuid::Uuid::new_v4().simple());
        let expires_at = state.clock + request.ttl;
        state.tokens.insert(token.clone(), TokenEntry { policies, expires_at });
        Ok(SecretString::new(token))
    }

    async fn kv_get(&self, mount: &str, path: &str) -> Result<BTreeMap<String, String>> {
        let state = self.vault.state.lock().await;
        let full = Self::full_path(mount, path);
        self.authorize(&state, &full, Capability::Read)?;
        state
            .mounts
            .get(mount)
            .and_then(|m| m.get(path))
            .cloned()
            .ok_or_else(|| SecretsError::not_found("secret content", full))
    }

    async fn kv_put(&self, mount: &str, path: &str, data: &BTreeMap<String, String>) -> Result<()> {
        let mut state = self.vault.state.lock().await;
        let full = Self::full_path(mount, path);
        let exists = state.mounts.get(mount).is_some_and(|m| m.contains_key(path));
        let capability = if exists { Capability::Update } else { Capability::Create };
        self.authorize(&state, &full, capability)?;

        let entries = state
            .mounts
            .get_mut(mount)
            .ok_or_else(|| SecretsError::not_found("mount", mount))?;
        entries.insert(path.to_string(), data.clone());
        Ok(())
    }

    async fn kv_delete(&self, mount: &str, path: &str) -> Result<()> {
        let mut state = self.vault.state.lock().await;
        let full = Self::full_path(mount, path);
        self.authorize(&state, &full, Capability::Delete)?;
        if let Some(entries) = state.mounts.get_mut(mount) {
            entries.remove(path);
        }
        Ok(())
    }

    async fn kv_list(&self, mount: &str, path: &str) -> Result<Vec<String>> {
        let state = self.vault.state.lock().await;
        let full = Self::full_path(mount, path);
        self.authorize(&state, &full, Capability::List)?;
        let entries = state.mounts.get(mount).ok_or_else(|| SecretsError::not_found("mount", mount))?;
        Ok(entries.keys().filter(|k| k.starts_with(path)).cloned().collect())
    }

    async fn unseal(&self, key: &SecretString) -> Result<bool> {
        let mut state = self.vault.state.lock().await;
        Self::reachable(&state)?;
        let seal = &mut state.seal;
        if !seal.sealed {
            return Ok(false);
        }
        if !seal.keys.contains(key.expose_secret()) {
            return Err(SecretsError::backend_error("unseal key is invalid"));
        }
        seal.provided.insert(key.expose_secret().to_string());
        if seal.provided.len() >= seal.threshold {
            seal.sealed = false;
            seal.provided.clear();
        }
        Ok(seal.sealed)
    }

    async fn health(&self) -> Result<()> {
        let state = self.vault.state.lock().await;
        Self::ready(&state)
    }
}
