//! Document store boundary.
//!
//! The repository only ever talks to a [`DocumentStore`]: named collections
//! of schemaless JSON documents addressed by id, whole-document upserts,
//! deletes by id and a live listener that re-delivers the full ordered
//! result set whenever a collection changes.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use chrono::DateTime;
use futures::stream::{self, BoxStream, StreamExt};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;

/// Length of generated document ids.
const DOCUMENT_ID_LEN: usize = 20;

/// Buffered change notifications per collection before listeners lag.
const CHANGE_BUFFER: usize = 16;

/// Errors raised by a document store backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backend cannot be reached.
    #[error("document store unavailable")]
    Unavailable,

    /// The backend rejected or failed the operation.
    #[error("database error: {0}")]
    Database(String),

    /// A document could not be encoded or decoded.
    #[error("invalid document: {0}")]
    Serialization(String),

    /// Filesystem error while opening the backend.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// One stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Deserializes the document body.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Sort order for listings and live queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Descending,
        }
    }

    /// Sorts documents in place. Missing or null fields count as the
    /// smallest value; ties fall back to the document id.
    pub fn sort(&self, docs: &mut [Document]) {
        docs.sort_by(|a, b| {
            let ord = compare_values(a.data.get(&self.field), b.data.get(&self.field));
            let ord = match self.direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            };
            ord.then_with(|| a.id.cmp(&b.id))
        });
    }
}

/// Ordered snapshots of a collection, one per change.
pub type SnapshotStream = BoxStream<'static, Result<Vec<Document>, StoreError>>;

/// A document database reachable by the repository.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Allocates a fresh document id in `collection` without writing anything.
    fn new_document_id(&self, _collection: &str) -> String {
        generate_document_id()
    }

    /// Writes the whole document, replacing any existing one.
    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Removes a document. Deleting a missing document succeeds.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Reads the whole collection once, ordered.
    async fn list(&self, collection: &str, order: &OrderBy) -> Result<Vec<Document>, StoreError>;

    /// Opens a live query over the collection.
    ///
    /// The stream yields the current ordered set right away and again after
    /// every change. On failure it yields the error and ends.
    async fn listen(&self, collection: &str, order: OrderBy) -> Result<SnapshotStream, StoreError>;
}

/// Generates a random alphanumeric document id.
fn generate_document_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(DOCUMENT_ID_LEN)
        .map(char::from)
        .collect()
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => {
            // Timestamps compare as instants; fractional seconds make them
            // unsafe to compare as text.
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// A change notification fanned out to live listeners.
#[derive(Debug, Clone)]
pub enum Change {
    /// The collection was written to; listeners should re-read.
    Updated,
    /// The backend failed; listeners should end with this error.
    Failed(StoreError),
}

/// Per-collection broadcast channels for live listeners.
#[derive(Debug, Default)]
pub struct ChangeHub {
    channels: RwLock<HashMap<String, broadcast::Sender<Change>>>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, collection: &str) -> broadcast::Receiver<Change> {
        let mut channels = self.channels.write().await;

        if let Some(sender) = channels.get(collection) {
            sender.subscribe()
        } else {
            let (sender, receiver) = broadcast::channel(CHANGE_BUFFER);
            channels.insert(collection.to_string(), sender);
            receiver
        }
    }

    pub async fn notify(&self, collection: &str, change: Change) {
        let channels = self.channels.read().await;

        if let Some(sender) = channels.get(collection) {
            // No listeners is fine
            let _ = sender.send(change);
        }
    }

    /// Sends a change to every collection's listeners.
    pub async fn notify_all(&self, change: Change) {
        let channels = self.channels.read().await;
        for sender in channels.values() {
            let _ = sender.send(change.clone());
        }
    }
}

/// Builds a [`SnapshotStream`] from a change receiver and a snapshot reader.
///
/// `changes` must be subscribed before the first read so no write can slip
/// between the initial snapshot and the first notification.
pub fn snapshot_stream<F, Fut>(changes: broadcast::Receiver<Change>, read: F) -> SnapshotStream
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Document>, StoreError>> + Send + 'static,
{
    stream::unfold(Some((changes, read, true)), |state| async move {
        let (mut changes, read, initial) = state?;

        if !initial {
            loop {
                match changes.recv().await {
                    // A lagged listener only missed notifications, not data.
                    Ok(Change::Updated) | Err(RecvError::Lagged(_)) => break,
                    Ok(Change::Failed(e)) => return Some((Err(e), None)),
                    Err(RecvError::Closed) => return None,
                }
            }
        }

        match read().await {
            Ok(docs) => Some((Ok(docs), Some((changes, read, false)))),
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, created_at: Value) -> Document {
        Document::new(id, json!({ "createdAt": created_at }))
    }

    #[test]
    fn test_generate_document_id() {
        let a = generate_document_id();
        let b = generate_document_id();

        assert_eq!(a.len(), DOCUMENT_ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_descending_timestamps_compare_as_instants() {
        // Lexically "…00Z" sorts after "…00.5Z", which is the wrong order
        let mut docs = vec![
            doc("a", json!("2024-06-01T10:00:00Z")),
            doc("b", json!("2024-06-01T10:00:00.500Z")),
            doc("c", json!("2024-05-01T10:00:00Z")),
        ];

        OrderBy::descending("createdAt").sort(&mut docs);

        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_missing_field_sorts_last_when_descending() {
        let mut docs = vec![
            Document::new("none", json!({})),
            doc("null", Value::Null),
            doc("set", json!("2024-06-01T10:00:00Z")),
        ];

        OrderBy {
            field: "createdAt".to_string(),
            direction: Direction::Ascending,
        }
        .sort(&mut docs);
        assert_eq!(docs[2].id, "set");

        OrderBy::descending("createdAt").sort(&mut docs);
        assert_eq!(docs[0].id, "set");
    }

    #[test]
    fn test_ties_break_by_id() {
        let mut docs = vec![doc("b", json!(1)), doc("a", json!(1))];
        OrderBy::descending("createdAt").sort(&mut docs);
        assert_eq!(docs[0].id, "a");
    }

    #[tokio::test]
    async fn test_change_hub_isolates_collections() {
        let hub = ChangeHub::new();

        let mut rx1 = hub.subscribe("holidays").await;
        let mut rx2 = hub.subscribe("other").await;

        hub.notify("holidays", Change::Updated).await;

        assert!(matches!(rx1.try_recv(), Ok(Change::Updated)));
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_snapshot_stream_emits_initial_then_on_change() {
        let hub = ChangeHub::new();
        let rx = hub.subscribe("holidays").await;

        let mut snapshots = snapshot_stream(rx, || async { Ok(vec![doc("a", Value::Null)]) });

        let first = snapshots.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);

        hub.notify("holidays", Change::Updated).await;
        assert!(snapshots.next().await.unwrap().is_ok());

        hub.notify("holidays", Change::Failed(StoreError::Unavailable))
            .await;
        let err = snapshots.next().await.unwrap().unwrap_err();
        assert!(matches!(err, StoreError::Unavailable));

        // Ends after the error
        assert!(snapshots.next().await.is_none());
    }
}
