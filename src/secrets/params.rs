//! Request parameters for secret mutations and backend option validation.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;
use validator::Validate;

use super::error::{Result, SecretsError};
use super::metadata::{RotatePolicy, SecretParams, SecretScope};
use super::tag::EntityTag;
use super::value::SecretValue;

/// Parameters for creating a secret.
#[derive(Debug, Clone, Default, Validate)]
pub struct CreateParams {
    /// Required.
    pub owner_tag: Option<EntityTag>,
    /// Defaults to the owner's kind.
    pub scope: Option<SecretScope>,
    #[validate(length(max = 200, message = "label cannot exceed 200 characters"))]
    pub label: Option<String>,
    #[validate(length(max = 1000, message = "description cannot exceed 1000 characters"))]
    pub description: Option<String>,
    pub rotate_policy: Option<RotatePolicy>,
    pub next_rotate_time: Option<DateTime<Utc>>,
    pub expire_time: Option<DateTime<Utc>>,
    pub params: SecretParams,
    /// Content of revision 0. Required.
    pub data: Option<SecretValue>,
}

impl CreateParams {
    pub fn new(owner_tag: EntityTag, data: SecretValue) -> Self {
        Self { owner_tag: Some(owner_tag), data: Some(data), ..Self::default() }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_rotate_policy(mut self, policy: RotatePolicy) -> Self {
        self.rotate_policy = Some(policy);
        self
    }

    /// Structural checks shared by every backend.
    pub fn check(&self) -> Result<()> {
        Validate::validate(self)?;
        if self.owner_tag.is_none() {
            return Err(SecretsError::validation_field("secret owner is required", "owner_tag"));
        }
        if let (Some(RotatePolicy::Never), Some(_)) = (self.rotate_policy, self.next_rotate_time) {
            return Err(SecretsError::validation_field(
                "next rotate time cannot be set when the rotate policy is never",
                "next_rotate_time",
            ));
        }
        match &self.data {
            Some(data) => data.validate(),
            None => Err(SecretsError::validation_field("secret content is required", "data")),
        }
    }
}

/// Partial update of a secret. `None` leaves a field unchanged.
///
/// `Some("")` clears `label`/`description`, `Some(None)` clears a time, and a
/// param whose value is the empty string removes that param.
#[derive(Debug, Clone, Default, Validate)]
pub struct UpdateParams {
    #[validate(length(max = 200, message = "label cannot exceed 200 characters"))]
    pub label: Option<String>,
    #[validate(length(max = 1000, message = "description cannot exceed 1000 characters"))]
    pub description: Option<String>,
    pub rotate_policy: Option<RotatePolicy>,
    pub next_rotate_time: Option<Option<DateTime<Utc>>>,
    pub expire_time: Option<Option<DateTime<Utc>>>,
    pub params: Option<SecretParams>,
    /// Content of a new revision.
    pub data: Option<SecretValue>,
}

impl UpdateParams {
    pub fn with_data(data: SecretValue) -> Self {
        Self { data: Some(data), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.label.is_none()
            && self.description.is_none()
            && self.rotate_policy.is_none()
            && self.next_rotate_time.is_none()
            && self.expire_time.is_none()
            && self.params.is_none()
            && self.data.is_none()
    }

    pub fn check(&self) -> Result<()> {
        Validate::validate(self)?;
        if self.is_empty() {
            return Err(SecretsError::validation("nothing to update"));
        }
        if let Some(data) = &self.data {
            data.validate()?;
        }
        Ok(())
    }
}

/// Turns a partial option map into a fully populated, validated one.
pub trait ParamsValidator: Send + Sync + Debug {
    fn validate(&self, partial: &SecretParams) -> Result<SecretParams>;
}

/// Accepts any options unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughParams;

impl ParamsValidator for PassthroughParams {
    fn validate(&self, partial: &SecretParams) -> Result<SecretParams> {
        Ok(partial.clone())
    }
}

/// Declared type of a backend option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Int,
    Bool,
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub kind: ParamKind,
    pub default: Option<Value>,
}

/// Validates options against declared types and fills in defaults.
///
/// Unknown keys are rejected. String values are coerced to the declared type
/// where they parse cleanly.
#[derive(Debug, Clone, Default)]
pub struct DefaultsParams {
    specs: BTreeMap<String, ParamSpec>,
}

impl DefaultsParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn option(mut self, name: impl Into<String>, kind: ParamKind, default: Option<Value>) -> Self {
        self.specs.insert(name.into(), ParamSpec { kind, default });
        self
    }
}

fn coerce(name: &str, kind: ParamKind, value: &Value) -> Result<Value> {
    let invalid = || {
        SecretsError::validation_field(
            format!("option {:?}: expected {:?}, got {}", name, kind, value),
            "params",
        )
    };
    match (kind, value) {
        (ParamKind::String, Value::String(_)) => Ok(value.clone()),
        (ParamKind::Int, Value::Number(n)) if n.is_i64() => Ok(value.clone()),
        (ParamKind::Int, Value::String(s)) => s.parse::<i64>().map(Value::from).map_err(|_| invalid()),
        (ParamKind::Bool, Value::Bool(_)) => Ok(value.clone()),
        (ParamKind::Bool, Value::String(s)) => s.parse::<bool>().map(Value::from).map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

impl ParamsValidator for DefaultsParams {
    fn validate(&self, partial: &SecretParams) -> Result<SecretParams> {
        let mut full = SecretParams::new();
        for (name, value) in partial {
            let spec = self.specs.get(name).ok_or_else(|| {
                SecretsError::validation_field(format!("unknown option {:?}", name), "params")
            })?;
            full.insert(name.clone(), coerce(name, spec.kind, value)?);
        }
        for (name, spec) in &self.specs {
            if let Some(default) = &spec.default {
                full.entry(name.clone()).or_insert_with(|| default.clone());
            }
        }
        Ok(full)
    }
}

fn is_removal(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.is_empty())
}

/// Options for a new secret: removals dropped, the rest completed.
pub fn complete_params(validator: &dyn ParamsValidator, params: &SecretParams) -> Result<SecretParams> {
    let provided: SecretParams =
        params.iter().filter(|(_, v)| !is_removal(v)).map(|(k, v)| (k.clone(), v.clone())).collect();
    validator.validate(&provided)
}

/// Merge an options update into the existing options.
///
/// Empty-string values remove keys. The remaining values are validated, and
/// defaults the caller did not provide are stripped so they never overwrite
/// existing values.
pub fn merge_params(
    validator: &dyn ParamsValidator,
    existing: &SecretParams,
    update: &SecretParams,
) -> Result<SecretParams> {
    let (removed, provided): (Vec<_>, Vec<_>) = update.iter().partition(|(_, v)| is_removal(v));
    let provided: SecretParams = provided.into_iter().map(|(k, v)| (k.clone(), v.clone())).collect();

    let mut validated = validator.validate(&provided)?;
    validated.retain(|k, _| provided.contains_key(k));

    let mut merged = existing.clone();
    for (key, _) in removed {
        merged.remove(key);
    }
    merged.extend(validated);
    Ok(merged)
}
