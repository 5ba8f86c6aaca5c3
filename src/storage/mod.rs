//! # Document Storage
//!
//! The secret catalog persists JSON documents grouped into named collections.
//! [`DocumentStore`] is the narrow transactional primitive the catalog needs:
//! a batch of asserted writes applied atomically, point reads, and equality
//! scans ordered by document id.

pub mod error;
pub mod memory;
pub mod pool;
pub mod sqlite;

pub use crate::config::StorageConfig;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryDocumentStore;
pub use pool::{create_pool, get_pool_stats, sanitize_url, DbPool, PoolStats};
pub use sqlite::SqliteDocumentStore;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::config::StorageBackend;

/// A single write in a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TxnOp {
    /// Create a document, failing if it already exists.
    Insert { collection: String, id: String, doc: Value },
    /// Replace a document, failing if it does not exist.
    Update { collection: String, id: String, doc: Value },
    /// Create or replace a document.
    Upsert { collection: String, id: String, doc: Value },
    /// Remove a document. Removing a missing document is not an error.
    Delete { collection: String, id: String },
}

impl TxnOp {
    pub fn insert(collection: &str, id: impl Into<String>, doc: Value) -> Self {
        Self::Insert { collection: collection.to_string(), id: id.into(), doc }
    }

    pub fn update(collection: &str, id: impl Into<String>, doc: Value) -> Self {
        Self::Update { collection: collection.to_string(), id: id.into(), doc }
    }

    pub fn upsert(collection: &str, id: impl Into<String>, doc: Value) -> Self {
        Self::Upsert { collection: collection.to_string(), id: id.into(), doc }
    }

    pub fn delete(collection: &str, id: impl Into<String>) -> Self {
        Self::Delete { collection: collection.to_string(), id: id.into() }
    }

    pub fn collection(&self) -> &str {
        match self {
            Self::Insert { collection, .. }
            | Self::Update { collection, .. }
            | Self::Upsert { collection, .. }
            | Self::Delete { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Insert { id, .. }
            | Self::Update { id, .. }
            | Self::Upsert { id, .. }
            | Self::Delete { id, .. } => id,
        }
    }
}

/// Equality filter on top-level document fields. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    fields: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((field.into(), value.into()));
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.fields.iter().all(|(field, expected)| doc.get(field) == Some(expected))
    }
}

/// A stored document and its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub body: Value,
}

#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    /// Apply every op or none of them.
    async fn run_transaction(&self, ops: Vec<TxnOp>) -> StorageResult<()>;

    async fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Value>>;

    /// Documents in `collection` matching `filter`, ordered by id.
    async fn find(&self, collection: &str, filter: &Filter) -> StorageResult<Vec<Document>>;
}

/// Build the document store selected by configuration.
pub async fn open_store(config: &StorageConfig) -> StorageResult<Arc<dyn DocumentStore>> {
    match config.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory document store");
            Ok(Arc::new(MemoryDocumentStore::new()))
        }
        StorageBackend::Sqlite => {
            let store = SqliteDocumentStore::connect(config).await?;
            Ok(Arc::new(store))
        }
    }
}
