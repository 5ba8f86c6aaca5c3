//! Document store errors.

use thiserror::Error;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    /// An `Insert` found an existing document.
    #[error("document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    /// An `Update` found no document.
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    /// Database and storage errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    #[error("Invalid storage configuration: {0}")]
    Config(String),
}

impl StorageError {
    pub fn database(source: sqlx::Error, context: impl Into<String>) -> Self {
        Self::Database { source, context: context.into() }
    }

    pub fn serialization(source: serde_json::Error, context: impl Into<String>) -> Self {
        Self::Serialization { source, context: context.into() }
    }
}
