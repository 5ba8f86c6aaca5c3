//! Error types for secrets operations.
//!
//! Backend-specific failures are classified into [`SecretsError`] exactly once,
//! at the content store / provider boundary. Code above that boundary matches on
//! [`ErrorKind`] and never inspects backend error text.

use std::fmt;
use thiserror::Error;

use crate::storage::StorageError;

/// Result type for secrets operations.
pub type Result<T> = std::result::Result<T, SecretsError>;

/// Whether an interrupted mutation reached the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The operation was interrupted before any backend write was issued.
    NotApplied,
    /// A backend write was in flight; it may or may not have been applied.
    /// Downstream steps are idempotent, so a retry is safe.
    Unknown,
}

impl fmt::Display for MutationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationOutcome::NotApplied => write!(f, "not applied"),
            MutationOutcome::Unknown => write!(f, "outcome unknown"),
        }
    }
}

/// Stable classification of a [`SecretsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Unavailable,
    Timeout,
    Cancelled,
    Inconsistent,
    Config,
    Backend,
    Storage,
    Serialization,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::PermissionDenied => "permission_denied",
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Inconsistent => "inconsistent",
            Self::Config => "config",
            Self::Backend => "backend",
            Self::Storage => "storage",
            Self::Serialization => "serialization",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during secrets operations.
#[derive(Error, Debug)]
pub enum SecretsError {
    /// Malformed or missing request fields. Never retried.
    #[error("Validation failed: {message}")]
    Validation { message: String, field: Option<String> },

    /// Missing secret, revision, policy or content.
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// Duplicate identifier on create.
    #[error("{resource} already exists: {id}")]
    AlreadyExists { resource: String, id: String },

    /// Backend authorization failure. Never retried, the credential is invalid.
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    /// Backend unreachable. Safe to retry idempotent operations.
    #[error("Backend unavailable: {message}")]
    Unavailable { message: String },

    /// Backend did not answer within the request deadline.
    #[error("Operation timed out: {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// The caller cancelled the request.
    #[error("Operation cancelled: {operation} ({outcome})")]
    Cancelled { operation: String, outcome: MutationOutcome },

    /// Metadata for a revision was written but its content was not.
    ///
    /// Reported so a reconciliation pass can repair the orphaned metadata.
    #[error("Secret {uri} revision {revision} has metadata but no content: {source}")]
    Inconsistent {
        uri: String,
        revision: u32,
        #[source]
        source: Box<SecretsError>,
    },

    /// Invalid backend or provider configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Unclassified backend failure.
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// Document store failure.
    #[error("Storage error: {context}")]
    Storage {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SecretsError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound { resource: resource.into(), id: id.into() }
    }

    pub fn already_exists(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists { resource: resource.into(), id: id.into() }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied { message: message.into() }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into() }
    }

    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), duration_ms }
    }

    pub fn cancelled(operation: impl Into<String>, outcome: MutationOutcome) -> Self {
        Self::Cancelled { operation: operation.into(), outcome }
    }

    pub fn inconsistent(uri: impl Into<String>, revision: u32, source: SecretsError) -> Self {
        Self::Inconsistent { uri: uri.into(), revision, source: Box::new(source) }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    pub fn backend_error(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into() }
    }

    pub fn storage(context: impl Into<String>) -> Self {
        Self::Storage { context: context.into(), source: None }
    }

    pub fn storage_with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage { context: context.into(), source: Some(Box::new(source)) }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// The stable classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Inconsistent { .. } => ErrorKind::Inconsistent,
            Self::Config { .. } => ErrorKind::Config,
            Self::Backend { .. } => ErrorKind::Backend,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_permission_denied(&self) -> bool {
        self.kind() == ErrorKind::PermissionDenied
    }

    /// Check if an idempotent operation failing with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Unavailable | ErrorKind::Timeout)
    }

    /// Prefix the message with extra context, keeping the classification.
    pub fn annotate(self, context: impl fmt::Display) -> Self {
        match self {
            Self::Validation { message, field } => {
                Self::Validation { message: format!("{}: {}", context, message), field }
            }
            Self::PermissionDenied { message } => {
                Self::PermissionDenied { message: format!("{}: {}", context, message) }
            }
            Self::Unavailable { message } => {
                Self::Unavailable { message: format!("{}: {}", context, message) }
            }
            Self::Config { message } => {
                Self::Config { message: format!("{}: {}", context, message) }
            }
            Self::Backend { message } => {
                Self::Backend { message: format!("{}: {}", context, message) }
            }
            Self::Storage { context: ctx, source } => {
                Self::Storage { context: format!("{}: {}", context, ctx), source }
            }
            Self::Internal { message } => {
                Self::Internal { message: format!("{}: {}", context, message) }
            }
            other => other,
        }
    }
}

impl From<validator::ValidationErrors> for SecretsError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        let first_field = fields.first().map(|(field, _)| field.to_string());
        let message = fields
            .iter()
            .map(|(field, field_errors)| {
                let messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| e.message.as_ref().map_or("invalid value".to_string(), |m| m.to_string()))
                    .collect();
                format!("{}: {}", field, messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::Validation { message, field: first_field }
    }
}

impl From<StorageError> for SecretsError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::AlreadyExists { collection, id } => Self::already_exists(collection, id),
            StorageError::NotFound { collection, id } => Self::not_found(collection, id),
            other => Self::storage_with_source("document store operation failed", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_classification() {
        let err: SecretsError =
            StorageError::AlreadyExists { collection: "secrets".into(), id: "a".into() }.into();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let err: SecretsError = StorageError::Config("bad".into()).into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_error_constructors() {
        let err = SecretsError::not_found("secret", "secret:abc");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "secret not found: secret:abc");

        let err = SecretsError::already_exists("secret", "secret:abc");
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let err = SecretsError::validation_field("owner is required", "owner");
        assert!(matches!(err, SecretsError::Validation { field: Some(ref f), .. } if f == "owner"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SecretsError::unavailable("connection refused").is_retryable());
        assert!(SecretsError::timeout("get_content", 5000).is_retryable());
        assert!(!SecretsError::permission_denied("bad token").is_retryable());
        assert!(!SecretsError::validation("bad").is_retryable());
        assert!(!SecretsError::already_exists("secret", "x").is_retryable());
    }

    #[test]
    fn test_inconsistent_keeps_source() {
        let err = SecretsError::inconsistent(
            "secret:abc",
            2,
            SecretsError::unavailable("vault sealed"),
        );
        assert_eq!(err.kind(), ErrorKind::Inconsistent);
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("vault sealed"));
    }

    #[test]
    fn test_annotate_keeps_kind() {
        let err = SecretsError::permission_denied("403").annotate("reading secret \"abc-0\"");
        assert!(err.is_permission_denied());
        assert!(err.to_string().contains("reading secret"));

        let err = SecretsError::not_found("policy", "p").annotate("ignored");
        assert_eq!(err.to_string(), "policy not found: p");
    }

    #[test]
    fn test_cancelled_display() {
        let err = SecretsError::cancelled("save_content", MutationOutcome::Unknown);
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(err.to_string().contains("outcome unknown"));
    }
}
