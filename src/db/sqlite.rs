//! SQLite-backed document store.
//!
//! Documents live in a single `documents` table keyed by
//! `(collection, id)`, with the body stored as JSON text. Live listeners are
//! notified in-process, so only writes made through this store (or its
//! clones) wake them.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use super::store::{
    snapshot_stream, Change, ChangeHub, Document, DocumentStore, OrderBy, SnapshotStream,
    StoreError,
};

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    data: String,
}

impl DocumentRow {
    fn into_document(self) -> Result<Document, StoreError> {
        let data: Value = serde_json::from_str(&self.data)?;
        Ok(Document::new(self.id, data))
    }
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    hub: Arc<ChangeHub>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database file and runs migrations.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, running migrations on it.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self {
            pool,
            hub: Arc::new(ChangeHub::new()),
        })
    }

    async fn fetch_all(pool: &SqlitePool, collection: &str) -> Result<Vec<Document>, StoreError> {
        let rows: Vec<DocumentRow> =
            sqlx::query_as("SELECT id, data FROM documents WHERE collection = ?")
                .bind(collection)
                .fetch_all(pool)
                .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                match row.into_document() {
                    Ok(doc) => Some(doc),
                    Err(e) => {
                        tracing::warn!("skipping unreadable document {}/{}: {}", collection, id, e);
                        None
                    }
                }
            })
            .collect())
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        let body = serde_json::to_string(&data)?;

        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, data)
            VALUES (?, ?, ?)
            ON CONFLICT (collection, id) DO UPDATE SET data = excluded.data
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(&body)
        .execute(&self.pool)
        .await?;

        tracing::debug!("set {}/{}", collection, id);
        self.hub.notify(collection, Change::Updated).await;
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let row: Option<DocumentRow> =
            sqlx::query_as("SELECT id, data FROM documents WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(DocumentRow::into_document).transpose()
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::debug!(
            "delete {}/{} ({} row(s))",
            collection,
            id,
            result.rows_affected()
        );
        if result.rows_affected() > 0 {
            self.hub.notify(collection, Change::Updated).await;
        }
        Ok(())
    }

    async fn list(&self, collection: &str, order: &OrderBy) -> Result<Vec<Document>, StoreError> {
        let mut docs = Self::fetch_all(&self.pool, collection).await?;
        order.sort(&mut docs);
        Ok(docs)
    }

    async fn listen(&self, collection: &str, order: OrderBy) -> Result<SnapshotStream, StoreError> {
        let changes = self.hub.subscribe(collection).await;
        let pool = self.pool.clone();
        let collection = collection.to_string();

        Ok(snapshot_stream(changes, move || {
            let pool = pool.clone();
            let collection = collection.clone();
            let order = order.clone();
            async move {
                let mut docs = Self::fetch_all(&pool, &collection).await?;
                order.sort(&mut docs);
                Ok(docs)
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use tempfile::TempDir;

    struct TestContext {
        store: SqliteStore,
        _temp_dir: TempDir, // Keep alive for duration of test
    }

    async fn setup_store() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("holidays.db");
        TestContext {
            store: SqliteStore::open(&db_path).await.unwrap(),
            _temp_dir: temp_dir,
        }
    }

    #[tokio::test]
    async fn test_open_creates_documents_table() {
        let ctx = setup_store().await;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%'",
        )
        .fetch_all(&ctx.store.pool)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(table_names.contains(&"documents"));
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let ctx = setup_store().await;
        let store = &ctx.store;

        store
            .set("holidays", "x1", json!({ "title": "Lisbon" }))
            .await
            .unwrap();
        store
            .set("holidays", "x1", json!({ "title": "Porto" }))
            .await
            .unwrap();

        let doc = store.get("holidays", "x1").await.unwrap().unwrap();
        assert_eq!(doc.data, json!({ "title": "Porto" }));

        let all = store
            .list("holidays", &OrderBy::descending("createdAt"))
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_list_orders_by_field() {
        let ctx = setup_store().await;
        let store = &ctx.store;

        store
            .set("holidays", "old", json!({ "createdAt": "2024-01-01T00:00:00Z" }))
            .await
            .unwrap();
        store
            .set("holidays", "new", json!({ "createdAt": "2024-02-01T00:00:00Z" }))
            .await
            .unwrap();

        let docs = store
            .list("holidays", &OrderBy::descending("createdAt"))
            .await
            .unwrap();
        assert_eq!(docs[0].id, "new");
        assert_eq!(docs[1].id, "old");
    }

    #[tokio::test]
    async fn test_malformed_row_is_skipped() {
        let ctx = setup_store().await;
        let store = &ctx.store;

        sqlx::query("INSERT INTO documents (collection, id, data) VALUES (?, ?, ?)")
            .bind("holidays")
            .bind("broken")
            .bind("{not json")
            .execute(&store.pool)
            .await
            .unwrap();
        store
            .set("holidays", "x1", json!({ "title": "Lisbon" }))
            .await
            .unwrap();

        let docs = store
            .list("holidays", &OrderBy::descending("createdAt"))
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "x1");

        let mut snapshots = store
            .listen("holidays", OrderBy::descending("createdAt"))
            .await
            .unwrap();
        assert_eq!(snapshots.next().await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let ctx = setup_store().await;
        let store = &ctx.store;

        store.set("holidays", "x1", json!({})).await.unwrap();
        store.delete("holidays", "x1").await.unwrap();
        store.delete("holidays", "x1").await.unwrap();

        assert!(store.get("holidays", "x1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_listen_sees_writes() {
        let ctx = setup_store().await;
        let store = &ctx.store;

        let mut snapshots = store
            .listen("holidays", OrderBy::descending("createdAt"))
            .await
            .unwrap();
        assert!(snapshots.next().await.unwrap().unwrap().is_empty());

        store
            .set("holidays", "x1", json!({ "title": "Lisbon" }))
            .await
            .unwrap();

        let docs = snapshots.next().await.unwrap().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].data["title"], "Lisbon");
    }
}
