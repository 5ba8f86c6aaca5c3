//! Entity tags for secret owners, grant subjects and agents.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::error::SecretsError;

static APPLICATION_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9]*(?:-[a-z0-9]*[a-z][a-z0-9]*)*$").expect("application pattern is valid")
});

/// Kind of entity a tag refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagKind {
    Unit,
    Application,
    Model,
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Application => "application",
            Self::Model => "model",
        }
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `<kind>-<id>` reference to a unit, application or model.
///
/// Units are named `<application>/<number>` and tagged as
/// `unit-<application>-<number>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityTag {
    kind: TagKind,
    id: String,
}

impl EntityTag {
    pub fn unit(name: &str) -> Result<Self, SecretsError> {
        let (app, number) = name.split_once('/').ok_or_else(|| {
            SecretsError::validation_field(format!("invalid unit name {:?}", name), "tag")
        })?;
        if !APPLICATION_NAME.is_match(app) || number.is_empty() || number.parse::<u32>().is_err() {
            return Err(SecretsError::validation_field(format!("invalid unit name {:?}", name), "tag"));
        }
        Ok(Self { kind: TagKind::Unit, id: name.to_string() })
    }

    pub fn application(name: &str) -> Result<Self, SecretsError> {
        if !APPLICATION_NAME.is_match(name) {
            return Err(SecretsError::validation_field(
                format!("invalid application name {:?}", name),
                "tag",
            ));
        }
        Ok(Self { kind: TagKind::Application, id: name.to_string() })
    }

    pub fn model(uuid: uuid::Uuid) -> Self {
        Self { kind: TagKind::Model, id: uuid.to_string() }
    }

    pub fn kind(&self) -> TagKind {
        self.kind
    }

    /// The entity id: unit name, application name or model uuid.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Application a unit belongs to, or the application itself.
    pub fn application_name(&self) -> Option<&str> {
        match self.kind {
            TagKind::Unit => self.id.split_once('/').map(|(app, _)| app),
            TagKind::Application => Some(&self.id),
            TagKind::Model => None,
        }
    }
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TagKind::Unit => write!(f, "unit-{}", self.id.replace('/', "-")),
            _ => write!(f, "{}-{}", self.kind, self.id),
        }
    }
}

impl FromStr for EntityTag {
    type Err = SecretsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains('/') {
            return Self::unit(s);
        }
        if let Some(rest) = s.strip_prefix("unit-") {
            let (app, number) = rest.rsplit_once('-').ok_or_else(|| {
                SecretsError::validation_field(format!("invalid unit tag {:?}", s), "tag")
            })?;
            return Self::unit(&format!("{}/{}", app, number));
        }
        if let Some(rest) = s.strip_prefix("application-") {
            return Self::application(rest);
        }
        if let Some(rest) = s.strip_prefix("model-") {
            let uuid = uuid::Uuid::parse_str(rest).map_err(|_| {
                SecretsError::validation_field(format!("invalid model tag {:?}", s), "tag")
            })?;
            return Ok(Self::model(uuid));
        }
        Err(SecretsError::validation_field(format!("{:?} is not a valid entity tag", s), "tag"))
    }
}

impl Serialize for EntityTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
