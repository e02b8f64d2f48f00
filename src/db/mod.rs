mod holiday_repo;
mod memory;
mod sqlite;
mod store;

pub use holiday_repo::{HolidayRepository, HolidayStream, RepoError, COLLECTION};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{Direction, Document, DocumentStore, OrderBy, SnapshotStream, StoreError};

use std::path::Path;
use std::sync::Arc;

use crate::config::Backend;

/// Opens the configured document store.
pub async fn open_store(
    backend: Backend,
    database_path: &Path,
) -> Result<Arc<dyn DocumentStore>, StoreError> {
    match backend {
        Backend::Memory => {
            tracing::debug!("using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        Backend::Sqlite => {
            tracing::debug!("opening sqlite store at {}", database_path.display());
            Ok(Arc::new(SqliteStore::open(database_path).await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_store_sqlite_persists_between_opens() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let store = open_store(Backend::Sqlite, &db_path).await.unwrap();
        store
            .set(COLLECTION, "keep", json!({ "title": "Kept" }))
            .await
            .unwrap();
        drop(store);

        let reopened = open_store(Backend::Sqlite, &db_path).await.unwrap();
        let doc = reopened.get(COLLECTION, "keep").await.unwrap().unwrap();
        assert_eq!(doc.data["title"], "Kept");
    }

    #[tokio::test]
    async fn test_open_store_memory_ignores_path() {
        let store = open_store(Backend::Memory, Path::new("/nonexistent/x.db"))
            .await
            .unwrap();
        assert!(store.get(COLLECTION, "x").await.unwrap().is_none());
    }
}
