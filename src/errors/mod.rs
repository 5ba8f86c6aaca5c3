//! # Error Handling
//!
//! Application-level errors for configuration loading, storage setup and the
//! command line surface. Secrets operations return
//! [`SecretsError`](crate::secrets::SecretsError), which converts into
//! [`StrongroomError::Secrets`].

use crate::secrets::SecretsError;
use crate::storage::StorageError;

/// Custom result type for strongroom operations
pub type Result<T> = std::result::Result<T, StrongroomError>;

/// Main error type for the application
#[derive(thiserror::Error, Debug)]
pub enum StrongroomError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Catalog storage errors
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Secrets subsystem errors
    #[error(transparent)]
    Secrets(#[from] SecretsError),

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl StrongroomError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    pub fn io<S: Into<String>>(source: std::io::Error, context: S) -> Self {
        Self::Io { source, context: context.into() }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Process exit code for the command line surface.
    pub fn exit_code(&self) -> i32 {
        use crate::secrets::ErrorKind;
        match self {
            Self::Config { .. } | Self::Validation { .. } => 2,
            Self::Secrets(e) => match e.kind() {
                ErrorKind::Validation | ErrorKind::Config => 2,
                ErrorKind::NotFound => 3,
                ErrorKind::PermissionDenied => 4,
                ErrorKind::Unavailable | ErrorKind::Timeout => 5,
                _ => 1,
            },
            _ => 1,
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Secrets(e) => e.is_retryable(),
            Self::Storage(StorageError::Database { .. }) => true,
            Self::Io { .. } => true,
            _ => false,
        }
    }
}

impl From<std::io::Error> for StrongroomError {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for StrongroomError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<config::ConfigError> for StrongroomError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for StrongroomError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string()))
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = StrongroomError::config("Test configuration error");
        assert!(matches!(error, StrongroomError::Config { .. }));
        assert_eq!(error.to_string(), "Configuration error: Test configuration error");
    }

    #[test]
    fn test_validation_error() {
        let error = StrongroomError::validation_field("Invalid URL", "storage.url");
        if let StrongroomError::Validation { field, .. } = error {
            assert_eq!(field, Some("storage.url".to_string()));
        } else {
            panic!("expected validation error");
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(StrongroomError::config("x").exit_code(), 2);
        assert_eq!(StrongroomError::from(SecretsError::not_found("secret", "a")).exit_code(), 3);
        assert_eq!(StrongroomError::from(SecretsError::permission_denied("x")).exit_code(), 4);
        assert_eq!(StrongroomError::from(SecretsError::unavailable("x")).exit_code(), 5);
        assert_eq!(StrongroomError::internal("x").exit_code(), 1);
    }

    #[test]
    fn test_secrets_errors_are_transparent() {
        let error: StrongroomError = SecretsError::not_found("secret", "secret:abc").into();
        assert_eq!(error.to_string(), "secret not found: secret:abc");
        assert!(!error.is_retryable());

        let error: StrongroomError = SecretsError::unavailable("sealed").into();
        assert!(error.is_retryable());
    }

    #[test]
    fn test_error_conversions() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: StrongroomError = io_error.into();
        assert!(matches!(error, StrongroomError::Io { .. }));

        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error: StrongroomError = json_error.into();
        assert!(matches!(error, StrongroomError::Serialization { .. }));
    }
}
