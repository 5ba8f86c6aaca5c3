//! SecretValue codec.
//!
//! A [`SecretValue`] is the content of one revision: a map of attribute name to
//! string value. Internally (and on the wire to every backend) values are held
//! base64-encoded, so backends only ever store opaque ASCII strings and binary
//! payloads survive unchanged.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroize;

use super::error::{Result, SecretsError};

/// Suffix marking an argument value as already base64-encoded.
const BASE64_SUFFIX: &str = "#base64";

static KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z](?:-?[a-z0-9]){2,}$").expect("secret key pattern is valid"));

#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretValue {
    encoded: BTreeMap<String, String>,
}

impl SecretValue {
    /// Build a value from plaintext attributes.
    pub fn new<K, V, I>(values: I) -> Self
    where
        K: Into<String>,
        V: AsRef<[u8]>,
        I: IntoIterator<Item = (K, V)>,
    {
        let encoded = values.into_iter().map(|(k, v)| (k.into(), STANDARD.encode(v))).collect();
        Self { encoded }
    }

    /// Build a value from already-encoded attributes, as read back from a backend.
    pub fn from_encoded<K, V, I>(values: I) -> Result<Self>
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut encoded = BTreeMap::new();
        for (key, value) in values {
            let key = key.into();
            let value = value.into();
            if STANDARD.decode(&value).is_err() {
                return Err(SecretsError::backend_error(format!(
                    "content attribute {:?} is not valid base64",
                    key
                )));
            }
            encoded.insert(key, value);
        }
        Ok(Self { encoded })
    }

    /// Parse `key=value` / `key#base64=value` arguments into a value.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let mut encoded = BTreeMap::new();
        for arg in args {
            let arg = arg.as_ref();
            let (key, value) = arg.split_once('=').ok_or_else(|| {
                SecretsError::validation_field(format!("{:?} is not in key=value form", arg), "data")
            })?;
            let (key, value) = match key.strip_suffix(BASE64_SUFFIX) {
                Some(key) => {
                    STANDARD.decode(value).map_err(|_| {
                        SecretsError::validation_field(
                            format!("value for {:?} is not valid base64", key),
                            "data",
                        )
                    })?;
                    (key, value.to_string())
                }
                None => (key, STANDARD.encode(value)),
            };
            validate_key(key)?;
            encoded.insert(key.to_string(), value);
        }
        Ok(Self { encoded })
    }

    /// Check every attribute key against the key naming rules.
    pub fn validate(&self) -> Result<()> {
        if self.encoded.is_empty() {
            return Err(SecretsError::validation_field("secret content cannot be empty", "data"));
        }
        self.encoded.keys().try_for_each(|k| validate_key(k))
    }

    /// Encoded form stored by backends.
    pub fn encoded_values(&self) -> &BTreeMap<String, String> {
        &self.encoded
    }

    /// Decoded plaintext attributes.
    pub fn values(&self) -> Result<BTreeMap<String, String>> {
        self.encoded
            .iter()
            .map(|(k, v)| {
                let bytes = STANDARD.decode(v).map_err(|_| {
                    SecretsError::backend_error(format!("attribute {:?} is not valid base64", k))
                })?;
                let text = String::from_utf8(bytes).map_err(|_| {
                    SecretsError::backend_error(format!("attribute {:?} is not valid UTF-8", k))
                })?;
                Ok((k.clone(), text))
            })
            .collect()
    }

    /// Decoded value of a single attribute.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(encoded) = self.encoded.get(key) else {
            return Ok(None);
        };
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|_| SecretsError::backend_error(format!("attribute {:?} is not valid base64", key)))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| SecretsError::backend_error(format!("attribute {:?} is not valid UTF-8", key)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.encoded.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.encoded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }

    /// SHA-256 over the encoded attributes in key order, hex encoded.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in &self.encoded {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

fn validate_key(key: &str) -> Result<()> {
    if KEY_PATTERN.is_match(key) {
        Ok(())
    } else {
        Err(SecretsError::validation_field(
            format!("invalid secret key {:?}: keys are lowercase, at least 3 characters", key),
            "data",
        ))
    }
}

impl Drop for SecretValue {
    fn drop(&mut self) {
        for value in self.encoded.values_mut() {
            value.zeroize();
        }
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue").field("keys", &self.encoded.keys().collect::<Vec<_>>()).finish()
    }
}
