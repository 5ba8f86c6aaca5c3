//! In-memory document store.
//!
//! Transactions are applied to a copy of the touched collections and swapped in
//! only when every op succeeds.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{Document, DocumentStore, Filter, StorageError, StorageResult, TxnOp};

type Collection = BTreeMap<String, Value>;

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections.read().await.get(collection).map_or(0, |c| c.len())
    }
}

fn apply(staged: &mut HashMap<String, Collection>, op: TxnOp) -> StorageResult<()> {
    match op {
        TxnOp::Insert { collection, id, doc } => {
            let docs = staged.entry(collection.clone()).or_default();
            if docs.contains_key(&id) {
                return Err(StorageError::AlreadyExists { collection, id });
            }
            docs.insert(id, doc);
        }
        TxnOp::Update { collection, id, doc } => {
            let docs = staged.entry(collection.clone()).or_default();
            match docs.get_mut(&id) {
                Some(existing) => *existing = doc,
                None => return Err(StorageError::NotFound { collection, id }),
            }
        }
        TxnOp::Upsert { collection, id, doc } => {
            staged.entry(collection).or_default().insert(id, doc);
        }
        TxnOp::Delete { collection, id } => {
            if let Some(docs) = staged.get_mut(&collection) {
                docs.remove(&id);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn run_transaction(&self, ops: Vec<TxnOp>) -> StorageResult<()> {
        let mut collections = self.collections.write().await;

        let mut staged: HashMap<String, Collection> = HashMap::new();
        for op in &ops {
            let name = op.collection();
            if !staged.contains_key(name) {
                staged.insert(name.to_string(), collections.get(name).cloned().unwrap_or_default());
            }
        }

        let op_count = ops.len();
        for op in ops {
            apply(&mut staged, op)?;
        }

        collections.extend(staged);
        tracing::trace!(op_count, "Applied in-memory transaction");
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Value>> {
        Ok(self.collections.read().await.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn find(&self, collection: &str, filter: &Filter) -> StorageResult<Vec<Document>> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(_, body)| filter.matches(body))
            .map(|(id, body)| Document { id: id.clone(), body: body.clone() })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_asserts_missing() {
        let store = MemoryDocumentStore::new();
        store.run_transaction(vec![TxnOp::insert("secrets", "a", json!({"n": 1}))]).await.unwrap();

        let err = store
            .run_transaction(vec![TxnOp::insert("secrets", "a", json!({"n": 2}))])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        assert_eq!(store.get("secrets", "a").await.unwrap(), Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_failed_transaction_applies_nothing() {
        let store = MemoryDocumentStore::new();
        let err = store
            .run_transaction(vec![
                TxnOp::insert("secrets", "a", json!({})),
                TxnOp::insert("secretContent", "a-0", json!({})),
                TxnOp::update("secrets", "missing", json!({})),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
        assert_eq!(store.count("secrets").await, 0);
        assert_eq!(store.count("secretContent").await, 0);
    }

    #[tokio::test]
    async fn test_delete_missing_is_noop_and_find_is_ordered() {
        let store = MemoryDocumentStore::new();
        store
            .run_transaction(vec![
                TxnOp::upsert("secrets", "b", json!({"owner": "x"})),
                TxnOp::upsert("secrets", "a", json!({"owner": "x"})),
                TxnOp::upsert("secrets", "c", json!({"owner": "y"})),
                TxnOp::delete("secrets", "nope"),
                TxnOp::delete("other", "nope"),
            ])
            .await
            .unwrap();

        let found = store.find("secrets", &Filter::new().eq("owner", "x")).await.unwrap();
        let ids: Vec<_> = found.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(store.find("unknown", &Filter::new()).await.unwrap().is_empty());
    }
}
