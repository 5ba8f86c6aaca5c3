//! SQLite-backed document store.
//!
//! All collections share one `documents` table keyed by (collection, id); the
//! body is stored as JSON text. Transactions map onto a SQLite transaction,
//! which rolls back when dropped on the error path.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::Row;
use tracing::instrument;

use super::pool::{create_pool, DbPool};
use super::{Document, DocumentStore, Filter, StorageConfig, StorageError, StorageResult, TxnOp};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS documents (\
     collection TEXT NOT NULL, \
     id TEXT NOT NULL, \
     body TEXT NOT NULL, \
     PRIMARY KEY (collection, id))";

#[derive(Debug, Clone)]
pub struct SqliteDocumentStore {
    pool: DbPool,
}

impl SqliteDocumentStore {
    /// Connect and make sure the schema exists.
    pub async fn connect(config: &StorageConfig) -> StorageResult<Self> {
        let pool = create_pool(config).await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: DbPool) -> StorageResult<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| StorageError::database(e, "Failed to create documents table"))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn encode(doc: &Value, collection: &str, id: &str) -> StorageResult<String> {
    serde_json::to_string(doc)
        .map_err(|e| StorageError::serialization(e, format!("Failed to encode {}/{}", collection, id)))
}

fn decode(body: &str, collection: &str, id: &str) -> StorageResult<Value> {
    serde_json::from_str(body)
        .map_err(|e| StorageError::serialization(e, format!("Failed to decode {}/{}", collection, id)))
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    #[instrument(skip(self, ops), fields(op_count = ops.len()), name = "db_run_transaction")]
    async fn run_transaction(&self, ops: Vec<TxnOp>) -> StorageResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::database(e, "Failed to begin transaction"))?;

        for op in ops {
            match op {
                TxnOp::Insert { collection, id, doc } => {
                    let body = encode(&doc, &collection, &id)?;
                    let result = sqlx::query(
                        "INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3) \
                         ON CONFLICT (collection, id) DO NOTHING",
                    )
                    .bind(&collection)
                    .bind(&id)
                    .bind(&body)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        StorageError::database(e, format!("Failed to insert {}/{}", collection, id))
                    })?;
                    if result.rows_affected() == 0 {
                        return Err(StorageError::AlreadyExists { collection, id });
                    }
                }
                TxnOp::Update { collection, id, doc } => {
                    let body = encode(&doc, &collection, &id)?;
                    let result = sqlx::query(
                        "UPDATE documents SET body = $1 WHERE collection = $2 AND id = $3",
                    )
                    .bind(&body)
                    .bind(&collection)
                    .bind(&id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        StorageError::database(e, format!("Failed to update {}/{}", collection, id))
                    })?;
                    if result.rows_affected() == 0 {
                        return Err(StorageError::NotFound { collection, id });
                    }
                }
                TxnOp::Upsert { collection, id, doc } => {
                    let body = encode(&doc, &collection, &id)?;
                    sqlx::query(
                        "INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3) \
                         ON CONFLICT (collection, id) DO UPDATE SET body = excluded.body",
                    )
                    .bind(&collection)
                    .bind(&id)
                    .bind(&body)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        StorageError::database(e, format!("Failed to upsert {}/{}", collection, id))
                    })?;
                }
                TxnOp::Delete { collection, id } => {
                    sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                        .bind(&collection)
                        .bind(&id)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| {
                            StorageError::database(
                                e,
                                format!("Failed to delete {}/{}", collection, id),
                            )
                        })?;
                }
            }
        }

        tx.commit().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to commit document transaction");
            StorageError::database(e, "Failed to commit transaction")
        })
    }

    #[instrument(skip(self), name = "db_get_document")]
    async fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Value>> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::database(e, format!("Failed to get {}/{}", collection, id)))?;

        match row {
            Some(row) => {
                let body: String = row.get("body");
                decode(&body, collection, id).map(Some)
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, filter), name = "db_find_documents")]
    async fn find(&self, collection: &str, filter: &Filter) -> StorageResult<Vec<Document>> {
        let rows = sqlx::query("SELECT id, body FROM documents WHERE collection = $1 ORDER BY id")
            .bind(collection)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::database(e, format!("Failed to scan {}", collection)))?;

        let mut documents = Vec::new();
        for row in rows {
            let id: String = row.get("id");
            let body: String = row.get("body");
            let body = decode(&body, collection, &id)?;
            if filter.matches(&body) {
                documents.push(Document { id, body });
            }
        }
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> SqliteDocumentStore {
        let config = StorageConfig { url: "sqlite::memory:".to_string(), ..Default::default() };
        SqliteDocumentStore::connect(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_transaction_round_trip() {
        let store = store().await;
        store
            .run_transaction(vec![
                TxnOp::insert("secrets", "abc", json!({"owner_tag": "application-mysql"})),
                TxnOp::insert("secretRevisions", "abc-0", json!({"revision": 0})),
            ])
            .await
            .unwrap();

        assert_eq!(
            store.get("secrets", "abc").await.unwrap(),
            Some(json!({"owner_tag": "application-mysql"}))
        );
        assert_eq!(store.get("secrets", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_op_rolls_back_whole_batch() {
        let store = store().await;
        store.run_transaction(vec![TxnOp::insert("secrets", "abc", json!({}))]).await.unwrap();

        let err = store
            .run_transaction(vec![
                TxnOp::insert("secretRevisions", "abc-1", json!({})),
                TxnOp::insert("secrets", "abc", json!({})),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        assert_eq!(store.get("secretRevisions", "abc-1").await.unwrap(), None);

        let err = store
            .run_transaction(vec![TxnOp::update("secrets", "nope", json!({}))])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_upsert_delete_and_find() {
        let store = store().await;
        store
            .run_transaction(vec![
                TxnOp::upsert("secrets", "b", json!({"owner": "x", "n": 1})),
                TxnOp::upsert("secrets", "b", json!({"owner": "x", "n": 2})),
                TxnOp::upsert("secrets", "a", json!({"owner": "x"})),
                TxnOp::upsert("secrets", "c", json!({"owner": "y"})),
                TxnOp::delete("secrets", "missing"),
            ])
            .await
            .unwrap();

        let found = store.find("secrets", &Filter::new().eq("owner", "x")).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, "a");
        assert_eq!(found[1].body, json!({"owner": "x", "n": 2}));

        store.run_transaction(vec![TxnOp::delete("secrets", "a")]).await.unwrap();
        assert_eq!(store.find("secrets", &Filter::new()).await.unwrap().len(), 2);
    }
}
