//! Secret metadata and revision records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::error::SecretsError;
use super::provider::ProviderKind;
use super::tag::{EntityTag, TagKind};
use super::uri::SecretUri;

/// Backend-specific options attached to a secret.
pub type SecretParams = BTreeMap<String, serde_json::Value>;

/// Visibility scope of a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretScope {
    Unit,
    Application,
    Model,
}

impl SecretScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Application => "application",
            Self::Model => "model",
        }
    }

    /// Default scope for secrets owned by `owner`.
    pub fn for_owner(owner: &EntityTag) -> Self {
        match owner.kind() {
            TagKind::Unit => Self::Unit,
            TagKind::Application => Self::Application,
            TagKind::Model => Self::Model,
        }
    }
}

impl fmt::Display for SecretScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SecretScope {
    type Err = SecretsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unit" => Ok(Self::Unit),
            "application" => Ok(Self::Application),
            "model" => Ok(Self::Model),
            _ => Err(SecretsError::validation_field(format!("unknown secret scope {:?}", s), "scope")),
        }
    }
}

/// How often a secret's owner is asked to rotate it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotatePolicy {
    #[default]
    Never,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl RotatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }

    pub fn will_rotate(&self) -> bool {
        !matches!(self, Self::Never)
    }

    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::Hourly => Some(Duration::hours(1)),
            Self::Daily => Some(Duration::days(1)),
            Self::Weekly => Some(Duration::weeks(1)),
            Self::Monthly => Some(Duration::days(30)),
            Self::Quarterly => Some(Duration::days(90)),
            Self::Yearly => Some(Duration::days(365)),
        }
    }

    /// Next rotation time counted from `from`, if this policy rotates.
    pub fn next_rotate_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.interval().map(|i| from + i)
    }
}

impl fmt::Display for RotatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RotatePolicy {
    type Err = SecretsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "never" => Ok(Self::Never),
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" => Ok(Self::Yearly),
            _ => Err(SecretsError::validation_field(
                format!("unknown rotate policy {:?}", s),
                "rotate_policy",
            )),
        }
    }
}

/// Catalog record for a secret lineage. `uri` and `owner_tag` never change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretMetadata {
    pub uri: SecretUri,
    pub owner_tag: EntityTag,
    pub provider_label: ProviderKind,
    /// Record version, bumped on every metadata update.
    pub version: u32,
    pub scope: SecretScope,
    pub label: Option<String>,
    pub description: Option<String>,
    pub rotate_policy: RotatePolicy,
    pub next_rotate_time: Option<DateTime<Utc>>,
    pub expire_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub params: SecretParams,
    pub latest_revision: u32,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// One immutable revision of a secret's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRevision {
    pub uri: SecretUri,
    pub revision: u32,
    /// Backend content address, see [`SecretUri::name`].
    pub address: String,
    /// SHA-256 of the encoded content.
    pub checksum: String,
    pub create_time: DateTime<Utc>,
}

/// Set of (URI, revision) pairs handed to credential scoping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretRevisions(BTreeMap<SecretUri, BTreeSet<u32>>);

impl SecretRevisions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, uri: SecretUri, revisions: impl IntoIterator<Item = u32>) {
        self.0.entry(uri).or_default().extend(revisions);
    }

    pub fn contains(&self, uri: &SecretUri, revision: u32) -> bool {
        self.0.get(uri).is_some_and(|revs| revs.contains(&revision))
    }

    pub fn uris(&self) -> impl Iterator<Item = &SecretUri> {
        self.0.keys()
    }

    pub fn revisions(&self, uri: &SecretUri) -> Option<&BTreeSet<u32>> {
        self.0.get(uri)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(SecretUri, u32)> for SecretRevisions {
    fn from_iter<T: IntoIterator<Item = (SecretUri, u32)>>(iter: T) -> Self {
        let mut revisions = Self::new();
        for (uri, rev) in iter {
            revisions.add(uri, [rev]);
        }
        revisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_policy_parse_and_interval() {
        assert_eq!("".parse::<RotatePolicy>().unwrap(), RotatePolicy::Never);
        assert_eq!("daily".parse::<RotatePolicy>().unwrap(), RotatePolicy::Daily);
        assert!("fortnightly".parse::<RotatePolicy>().is_err());

        let now = Utc::now();
        assert_eq!(RotatePolicy::Never.next_rotate_time(now), None);
        assert_eq!(RotatePolicy::Hourly.next_rotate_time(now), Some(now + Duration::hours(1)));
        assert!(RotatePolicy::Weekly.will_rotate());
    }

    #[test]
    fn test_scope_defaults_to_owner_kind() {
        let unit = EntityTag::unit("mysql/0").unwrap();
        let app = EntityTag::application("mysql").unwrap();
        assert_eq!(SecretScope::for_owner(&unit), SecretScope::Unit);
        assert_eq!(SecretScope::for_owner(&app), SecretScope::Application);
    }

    #[test]
    fn test_secret_revisions_set() {
        let a = SecretUri::new("aaa").unwrap();
        let b = SecretUri::new("bbb").unwrap();
        let revs: SecretRevisions = [(a.clone(), 0), (a.clone(), 1), (b.clone(), 3)].into_iter().collect();

        assert_eq!(revs.len(), 2);
        assert!(revs.contains(&a, 1));
        assert!(!revs.contains(&b, 0));
        assert_eq!(revs.uris().cloned().collect::<Vec<_>>(), vec![a, b]);
    }
}
