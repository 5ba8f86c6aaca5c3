//! Secret URIs.
//!
//! A [`SecretUri`] identifies the whole lineage of a secret (every revision).
//! Its textual form is `secret:<id>`. The id is restricted to lowercase
//! alphanumerics because it is embedded verbatim in backend content paths and
//! access policy names. A content address is `<id>-<revision>`, so the first
//! hyphen always ends the id and a path glob `<id>-*` never reaches another
//! secret's revisions.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::error::SecretsError;

pub const SCHEME: &str = "secret";

const MAX_ID_LEN: usize = 64;
const GENERATED_ID_LEN: usize = 20;
const ID_ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

static ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+$").expect("secret id pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecretUri {
    id: String,
}

impl SecretUri {
    /// Build a URI from a bare id, validating its format.
    pub fn new(id: impl Into<String>) -> Result<Self, SecretsError> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self { id })
    }

    /// Generate a fresh random URI.
    pub fn generate() -> Self {
        let bytes = uuid::Uuid::new_v4().into_bytes();
        let mut bits: u128 = u128::from_be_bytes(bytes);
        let mut id = String::with_capacity(GENERATED_ID_LEN);
        for _ in 0..GENERATED_ID_LEN {
            id.push(ID_ALPHABET[(bits & 0x1f) as usize] as char);
            bits >>= 5;
        }
        Self { id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Content address of a revision, relative to the model namespace.
    pub fn name(&self, revision: u32) -> String {
        format!("{}-{}", self.id, revision)
    }

    /// Split a content address back into (id, revision).
    ///
    /// The revision is the digits after the hyphen.
    pub fn parse_name(address: &str) -> Option<(SecretUri, u32)> {
        let (id, revision) = address.split_once('-')?;
        let revision = revision.parse().ok()?;
        let uri = SecretUri::new(id).ok()?;
        Some((uri, revision))
    }
}

fn validate_id(id: &str) -> Result<(), SecretsError> {
    if id.is_empty() {
        return Err(SecretsError::validation_field("secret id cannot be empty", "uri"));
    }
    if id.len() > MAX_ID_LEN {
        return Err(SecretsError::validation_field(
            format!("secret id exceeds maximum length of {} characters", MAX_ID_LEN),
            "uri",
        ));
    }
    if !ID_PATTERN.is_match(id) {
        return Err(SecretsError::validation_field(
            format!("secret id {:?} must be lowercase alphanumerics", id),
            "uri",
        ));
    }
    Ok(())
}

impl fmt::Display for SecretUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", SCHEME, self.id)
    }
}

impl FromStr for SecretUri {
    type Err = SecretsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let id = match s.split_once(':') {
            Some((scheme, id)) if scheme == SCHEME => id,
            Some((scheme, _)) => {
                return Err(SecretsError::validation_field(
                    format!("invalid secret URI scheme {:?}", scheme),
                    "uri",
                ))
            }
            None => s,
        };
        Self::new(id)
    }
}

impl Serialize for SecretUri {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SecretUri {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_and_without_scheme() {
        let uri: SecretUri = "secret:secret1".parse().unwrap();
        assert_eq!(uri.id(), "secret1");
        assert_eq!(uri.to_string(), "secret:secret1");

        let bare: SecretUri = "secret1".parse().unwrap();
        assert_eq!(bare, uri);
    }

    #[test]
    fn test_rejects_unsafe_ids() {
        for bad in ["", "Secret", "a/b", "a*", "-abc", "abc-", "abc-def", "secret-1", "a b", "secret:", "x:abc"] {
            assert!(bad.parse::<SecretUri>().is_err(), "{:?} should be rejected", bad);
        }
        assert!(SecretUri::new("a".repeat(65)).is_err());
        assert!(SecretUri::new("a".repeat(64)).is_ok());
    }

    #[test]
    fn test_generate_is_valid_and_unique() {
        let a = SecretUri::generate();
        let b = SecretUri::generate();
        assert_eq!(a.id().len(), 20);
        assert_ne!(a, b);
        assert!(SecretUri::new(a.id()).is_ok());
    }

    #[test]
    fn test_name_and_parse_name() {
        let uri = SecretUri::new("secret1").unwrap();
        assert_eq!(uri.name(3), "secret1-3");

        let (parsed, rev) = SecretUri::parse_name("secret1-3").unwrap();
        assert_eq!(parsed, uri);
        assert_eq!(rev, 3);

        assert!(SecretUri::parse_name("secret").is_none());
        assert!(SecretUri::parse_name("secret-x").is_none());
        assert!(SecretUri::parse_name("abc-def-0").is_none());
    }

    #[test]
    fn test_serde_uses_text_form() {
        let uri = SecretUri::new("abc123").unwrap();
        let json = serde_json::to_string(&uri).unwrap();
        assert_eq!(json, "\"secret:abc123\"");
        let back: SecretUri = serde_json::from_str(&json).unwrap();
        assert_eq!(back, uri);
    }
}
