//! In-process document store.
//!
//! Keeps every collection in memory. Useful for tests and throwaway
//! sessions; [`MemoryStore::set_available`] simulates losing the backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::store::{
    snapshot_stream, Change, ChangeHub, Document, DocumentStore, OrderBy, SnapshotStream,
    StoreError,
};

type Collections = HashMap<String, BTreeMap<String, Value>>;

#[derive(Debug, Default)]
struct Inner {
    collections: RwLock<Collections>,
    hub: ChangeHub,
    unavailable: AtomicBool,
}

impl Inner {
    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Acquire) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }

    async fn snapshot(&self, collection: &str, order: &OrderBy) -> Result<Vec<Document>, StoreError> {
        self.check_available()?;

        let collections = self.collections.read().await;
        let mut docs: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default();

        order.sort(&mut docs);
        Ok(docs)
    }
}

/// Cloning is cheap; clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles the simulated backend connection.
    ///
    /// While unavailable every call fails with [`StoreError::Unavailable`],
    /// and going down ends all open listeners with that error.
    pub async fn set_available(&self, available: bool) {
        let was_unavailable = self.inner.unavailable.swap(!available, Ordering::AcqRel);
        if !available && !was_unavailable {
            tracing::debug!("memory store going offline");
            self.inner
                .hub
                .notify_all(Change::Failed(StoreError::Unavailable))
                .await;
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        self.inner.check_available()?;

        self.inner
            .collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);

        tracing::debug!("set {}/{}", collection, id);
        self.inner.hub.notify(collection, Change::Updated).await;
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.check_available()?;

        let collections = self.inner.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document::new(id, data.clone())))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.inner.check_available()?;

        let removed = self
            .inner
            .collections
            .write()
            .await
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some();

        tracing::debug!("delete {}/{} (existed: {})", collection, id, removed);
        if removed {
            self.inner.hub.notify(collection, Change::Updated).await;
        }
        Ok(())
    }

    async fn list(&self, collection: &str, order: &OrderBy) -> Result<Vec<Document>, StoreError> {
        self.inner.snapshot(collection, order).await
    }

    async fn listen(&self, collection: &str, order: OrderBy) -> Result<SnapshotStream, StoreError> {
        self.inner.check_available()?;

        let changes = self.inner.hub.subscribe(collection).await;
        let inner = Arc::clone(&self.inner);
        let collection = collection.to_string();

        Ok(snapshot_stream(changes, move || {
            let inner = Arc::clone(&inner);
            let collection = collection.clone();
            let order = order.clone();
            async move { inner.snapshot(&collection, &order).await }
        }))
    }
}
