//! Document store boundary.
//!
//! The backbone only needs an ordered keyed collection plus a change feed,
//! so that is all this trait promises. Production deployments back it with
//! a document database; tests and dev use [`InMemoryCollection`].

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

pub use memory::InMemoryCollection;

/// Kind of change carried by a notification.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
}

/// One change notification: the key and the document as written.
#[derive(Debug, Clone, PartialEq)]
pub struct Change<V> {
    pub key: String,
    pub kind: ChangeKind,
    pub document: V,
}

/// Result of an insert-if-absent.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome<V> {
    Created(V),
    /// A document already existed under the key; it is returned untouched.
    Existing(V),
}

impl<V> CreateOutcome<V> {
    pub fn into_inner(self) -> V {
        match self {
            CreateOutcome::Created(v) | CreateOutcome::Existing(v) => v,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// Document store operation error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// Keyed document collection with change notifications.
///
/// Every call is an async suspension point. Writes to a key are expected to
/// come from a single owning component, so the trait offers no
/// compare-and-swap beyond [`DocumentStore::create`].
#[async_trait]
pub trait DocumentStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Collection name (used for dead-letter ids and logs).
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<V>, StoreError>;

    /// Insert or replace the document under `key`.
    async fn upsert(&self, key: &str, value: V) -> Result<(), StoreError>;

    /// Insert only if `key` is free; otherwise return the existing document.
    async fn create(&self, key: &str, value: V) -> Result<CreateOutcome<V>, StoreError>;

    /// All documents ordered by key.
    async fn list(&self) -> Result<Vec<(String, V)>, StoreError>;

    /// Subscribe to changes written after this call.
    fn watch(&self) -> broadcast::Receiver<Change<V>>;
}

#[async_trait]
impl<V, S> DocumentStore<V> for std::sync::Arc<S>
where
    V: Clone + Send + Sync + 'static,
    S: DocumentStore<V> + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn get(&self, key: &str) -> Result<Option<V>, StoreError> {
        (**self).get(key).await
    }

    async fn upsert(&self, key: &str, value: V) -> Result<(), StoreError> {
        (**self).upsert(key, value).await
    }

    async fn create(&self, key: &str, value: V) -> Result<CreateOutcome<V>, StoreError> {
        (**self).create(key, value).await
    }

    async fn list(&self) -> Result<Vec<(String, V)>, StoreError> {
        (**self).list().await
    }

    fn watch(&self) -> broadcast::Receiver<Change<V>> {
        (**self).watch()
    }
}
