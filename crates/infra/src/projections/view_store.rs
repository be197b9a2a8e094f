use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use eventrail_core::{EventId, TraceId};

use crate::store::StoreError;

/// One projected document in a view.
///
/// `fields` is the projection payload; the rest is bookkeeping written by the
/// funnel alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionViewRecord {
    pub fields: Map<String, JsonValue>,
    pub last_processed_version: u64,
    pub trace_id: TraceId,
    pub last_event_id: EventId,
    pub updated_at: DateTime<Utc>,
}

impl ProjectionViewRecord {
    pub fn field(&self, name: &str) -> Option<&JsonValue> {
        self.fields.get(name)
    }
}

/// Read-model storage, partitioned by view name.
#[async_trait]
pub trait ViewStore: Send + Sync {
    async fn read(&self, view: &str, key: &str) -> Result<Option<ProjectionViewRecord>, StoreError>;
    async fn write(&self, view: &str, key: &str, record: ProjectionViewRecord) -> Result<(), StoreError>;
    /// Every record in `view`, ordered by key.
    async fn list(&self, view: &str) -> Result<Vec<(String, ProjectionViewRecord)>, StoreError>;
}

#[async_trait]
impl<S> ViewStore for Arc<S>
where
    S: ViewStore + ?Sized,
{
    async fn read(&self, view: &str, key: &str) -> Result<Option<ProjectionViewRecord>, StoreError> {
        (**self).read(view, key).await
    }

    async fn write(&self, view: &str, key: &str, record: ProjectionViewRecord) -> Result<(), StoreError> {
        (**self).write(view, key, record).await
    }

    async fn list(&self, view: &str) -> Result<Vec<(String, ProjectionViewRecord)>, StoreError> {
        (**self).list(view).await
    }
}

/// In-memory view store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryViewStore {
    inner: RwLock<BTreeMap<(String, String), ProjectionViewRecord>>,
}

impl InMemoryViewStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StoreError {
    StoreError::Storage("view store lock poisoned".into())
}

#[async_trait]
impl ViewStore for InMemoryViewStore {
    async fn read(&self, view: &str, key: &str) -> Result<Option<ProjectionViewRecord>, StoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(&(view.to_string(), key.to_string())).cloned())
    }

    async fn write(&self, view: &str, key: &str, record: ProjectionViewRecord) -> Result<(), StoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.insert((view.to_string(), key.to_string()), record);
        Ok(())
    }

    async fn list(&self, view: &str) -> Result<Vec<(String, ProjectionViewRecord)>, StoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map
            .iter()
            .filter(|((v, _), _)| v == view)
            .map(|((_, k), record)| (k.clone(), record.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: u64) -> ProjectionViewRecord {
        ProjectionViewRecord {
            fields: Map::new(),
            last_processed_version: version,
            trace_id: TraceId::parse("t").unwrap(),
            last_event_id: EventId::new(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn views_are_isolated() {
        let store = InMemoryViewStore::new();
        store.write("a", "k", record(1)).await.unwrap();
        store.write("b", "k", record(2)).await.unwrap();

        assert_eq!(store.read("a", "k").await.unwrap().unwrap().last_processed_version, 1);
        assert_eq!(store.list("b").await.unwrap().len(), 1);
        assert!(store.read("c", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_ordered_by_key() {
        let store = InMemoryViewStore::new();
        store.write("v", "m2", record(1)).await.unwrap();
        store.write("v", "m1", record(1)).await.unwrap();

        let keys: Vec<_> = store.list("v").await.unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["m1", "m2"]);
    }
}
