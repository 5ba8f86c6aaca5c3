//! Access policy derivation.
//!
//! Every policy a model uses is named `model-<uuid>-...`:
//!
//! | name                          | path              | capabilities                 |
//! |-------------------------------|-------------------|------------------------------|
//! | `model-<uuid>-read`           | `<uuid>/*`        | read                         |
//! | `model-<uuid>-create`         | `<uuid>/*`        | create                       |
//! | `model-<uuid>-<id>-owner`     | `<uuid>/<id>-*`   | create read update delete list |
//! | `model-<uuid>-<id>-read`      | `<uuid>/<id>-*`   | read                         |
//!
//! Policy names are parsed back exactly, so cleanup for one secret never
//! touches the policies of another secret whose id it prefixes.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use uuid::Uuid;

use crate::secrets::error::{Result, SecretsError};
use crate::secrets::uri::SecretUri;

static PATH_RULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"path\s+"([^"]+)"\s*\{\s*capabilities\s*=\s*\[([^\]]*)\]\s*\}"#)
        .expect("policy rule pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    Create,
    Read,
    Update,
    Delete,
    List,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::List => "list",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "read" => Some(Self::Read),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "list" => Some(Self::List),
            _ => None,
        }
    }
}

const OWNER_CAPABILITIES: [Capability; 5] =
    [Capability::Create, Capability::Read, Capability::Update, Capability::Delete, Capability::List];

/// Role a per-secret policy grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretRole {
    Owner,
    Reader,
}

impl SecretRole {
    fn suffix(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Reader => "read",
        }
    }
}

/// One `path "..." { capabilities = [...] }` stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    pub path: String,
    pub capabilities: Vec<Capability>,
}

impl PathRule {
    /// Whether the rule's path covers `path`. A trailing `*` is a prefix glob.
    pub fn matches(&self, path: &str) -> bool {
        match self.path.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => self.path == path,
        }
    }

    pub fn is_glob(&self) -> bool {
        self.path.ends_with('*')
    }
}

impl fmt::Display for PathRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let caps: Vec<String> = self.capabilities.iter().map(|c| format!("\"{}\"", c.as_str())).collect();
        write!(f, "path \"{}\" {{capabilities = [{}]}}", self.path, caps.join(", "))
    }
}

/// A named policy document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub name: String,
    pub rules: Vec<PathRule>,
}

impl Policy {
    fn single(name: String, path: String, capabilities: &[Capability]) -> Self {
        Self { name, rules: vec![PathRule { path, capabilities: capabilities.to_vec() }] }
    }

    /// Policy document text.
    pub fn to_hcl(&self) -> String {
        self.rules.iter().map(|r| r.to_string()).collect::<Vec<_>>().join("\n")
    }
}

/// Parse policy text into its path rules. Unknown capabilities are ignored.
pub fn parse_rules(hcl: &str) -> Result<Vec<PathRule>> {
    let rules: Vec<PathRule> = PATH_RULE
        .captures_iter(hcl)
        .map(|cap| PathRule {
            path: cap[1].to_string(),
            capabilities: cap[2]
                .split(',')
                .map(|c| c.trim().trim_matches('"'))
                .filter_map(Capability::parse)
                .collect(),
        })
        .collect();
    if rules.is_empty() && !hcl.trim().is_empty() {
        return Err(SecretsError::validation(format!("unparseable policy: {:?}", hcl)));
    }
    Ok(rules)
}

/// Policy name prefix shared by every policy of a model.
pub fn model_prefix(model_uuid: &Uuid) -> String {
    format!("model-{}", model_uuid)
}

/// Read access to every secret in the model.
pub fn admin_read_policy(model_uuid: &Uuid) -> Policy {
    Policy::single(
        format!("{}-read", model_prefix(model_uuid)),
        format!("{}/*", model_uuid),
        &[Capability::Read],
    )
}

/// Permission to create new content anywhere in the model namespace.
pub fn agent_create_policy(model_uuid: &Uuid) -> Policy {
    Policy::single(
        format!("{}-create", model_prefix(model_uuid)),
        format!("{}/*", model_uuid),
        &[Capability::Create],
    )
}

/// Full management of every revision of `uri`.
pub fn owner_policy(model_uuid: &Uuid, uri: &SecretUri) -> Policy {
    Policy::single(
        secret_policy_name(model_uuid, uri, SecretRole::Owner),
        secret_path_glob(model_uuid, uri),
        &OWNER_CAPABILITIES,
    )
}

/// Read access to every revision of `uri`.
pub fn reader_policy(model_uuid: &Uuid, uri: &SecretUri) -> Policy {
    Policy::single(
        secret_policy_name(model_uuid, uri, SecretRole::Reader),
        secret_path_glob(model_uuid, uri),
        &[Capability::Read],
    )
}

pub fn secret_policy_name(model_uuid: &Uuid, uri: &SecretUri, role: SecretRole) -> String {
    format!("{}-{}-{}", model_prefix(model_uuid), uri.id(), role.suffix())
}

// Ids never contain a hyphen, so this matches only revisions of `uri`.
fn secret_path_glob(model_uuid: &Uuid, uri: &SecretUri) -> String {
    format!("{}/{}-*", model_uuid, uri.id())
}

/// Split a per-secret policy name into (secret id, role).
///
/// Returns `None` for policies of other models and for the model-wide
/// `-read`/`-create` policies.
pub fn parse_secret_policy_name<'a>(model_uuid: &Uuid, name: &'a str) -> Option<(&'a str, SecretRole)> {
    let prefix = model_prefix(model_uuid);
    let rest = name.strip_prefix(prefix.as_str())?.strip_prefix('-')?;
    let (id, role) = if let Some(id) = rest.strip_suffix("-owner") {
        (id, SecretRole::Owner)
    } else if let Some(id) = rest.strip_suffix("-read") {
        (id, SecretRole::Reader)
    } else {
        return None;
    };
    SecretUri::new(id).ok()?;
    Some((id, role))
}
