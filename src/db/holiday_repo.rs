use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use super::store::{Document, DocumentStore, OrderBy, StoreError};
use crate::models::Holiday;

/// Collection holding one document per holiday.
pub const COLLECTION: &str = "holidays";

/// Field the live query orders by, newest first.
const ORDER_FIELD: &str = "createdAt";

#[derive(Debug, Clone, thiserror::Error)]
pub enum RepoError {
    /// Update called on a holiday that was never persisted.
    #[error("Missing id")]
    MissingId,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Live, filtered holiday listings, newest first.
pub type HolidayStream = BoxStream<'static, Result<Vec<Holiday>, RepoError>>;

#[derive(Clone)]
pub struct HolidayRepository {
    store: Arc<dyn DocumentStore>,
}

impl HolidayRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Stores a new holiday and returns its id.
    ///
    /// Any id or `created_at` on the input is ignored; both are assigned here.
    pub async fn create(&self, holiday: &Holiday) -> Result<String, RepoError> {
        let id = self.store.new_document_id(COLLECTION);
        let to_save = Holiday {
            id: id.clone(),
            created_at: Some(Utc::now()),
            ..holiday.clone()
        };

        let data = serde_json::to_value(&to_save).map_err(StoreError::from)?;
        self.store.set(COLLECTION, &id, data).await?;

        tracing::debug!("created holiday {} ({})", id, to_save.title);
        Ok(id)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Holiday>, RepoError> {
        if id.is_empty() {
            return Ok(None);
        }

        match self.store.get(COLLECTION, id).await? {
            Some(doc) => Ok(Some(decode(&doc)?)),
            None => Ok(None),
        }
    }

    /// Every holiday matching `query`, newest first, read once.
    pub async fn list(&self, query: &str) -> Result<Vec<Holiday>, RepoError> {
        let docs = self
            .store
            .list(COLLECTION, &OrderBy::descending(ORDER_FIELD))
            .await?;
        Ok(filter_documents(&docs, query))
    }

    /// Overwrites the whole stored record at `holiday.id`.
    ///
    /// A missing `created_at` keeps the stored one; creation time is write-once.
    pub async fn update(&self, holiday: &Holiday) -> Result<(), RepoError> {
        if !holiday.is_persisted() {
            return Err(RepoError::MissingId);
        }

        let mut to_save = holiday.clone();
        if to_save.created_at.is_none() {
            if let Some(existing) = self.store.get(COLLECTION, &holiday.id).await? {
                to_save.created_at = decode(&existing).ok().and_then(|h| h.created_at);
            }
        }

        let data = serde_json::to_value(&to_save).map_err(StoreError::from)?;
        self.store.set(COLLECTION, &holiday.id, data).await?;

        tracing::debug!("updated holiday {}", holiday.id);
        Ok(())
    }

    /// Deletes by id. Deleting a missing holiday succeeds.
    pub async fn delete(&self, id: &str) -> Result<(), RepoError> {
        self.store.delete(COLLECTION, id).await?;
        tracing::debug!("deleted holiday {}", id);
        Ok(())
    }

    /// Opens a live query filtered by `query`.
    ///
    /// Every change to the collection yields the full matching list, ordered
    /// by creation time descending. A subscription error is yielded once and
    /// ends the stream.
    pub fn watch(&self, query: &str) -> HolidayStream {
        let store = Arc::clone(&self.store);
        let query = query.to_string();

        let snapshots = stream::once(async move {
            store
                .listen(COLLECTION, OrderBy::descending(ORDER_FIELD))
                .await
        })
        .try_flatten();

        snapshots
            .map(move |snapshot| match snapshot {
                Ok(docs) => Ok(filter_documents(&docs, &query)),
                Err(e) => {
                    tracing::warn!("holiday subscription failed: {}", e);
                    Err(RepoError::from(e))
                }
            })
            .boxed()
    }
}

fn decode(doc: &Document) -> Result<Holiday, StoreError> {
    let mut holiday: Holiday = doc.decode()?;
    // The document key is authoritative
    holiday.id = doc.id.clone();
    Ok(holiday)
}

fn filter_documents(docs: &[Document], query: &str) -> Vec<Holiday> {
    docs.iter()
        .filter_map(|doc| match decode(doc) {
            Ok(holiday) => Some(holiday),
            Err(e) => {
                tracing::warn!("skipping unreadable holiday {}: {}", doc.id, e);
                None
            }
        })
        .filter(|holiday| holiday.matches(query))
        .collect()
}
