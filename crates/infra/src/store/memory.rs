use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{Change, ChangeKind, CreateOutcome, DocumentStore, StoreError};

const DEFAULT_FEED_CAPACITY: usize = 1024;

/// In-memory ordered collection for tests/dev.
///
/// - Keys are kept sorted (`BTreeMap`)
/// - Every write is broadcast to watchers after the lock is released
/// - Slow watchers lag rather than block writers
#[derive(Debug)]
pub struct InMemoryCollection<V> {
    name: String,
    docs: RwLock<BTreeMap<String, V>>,
    feed: broadcast::Sender<Change<V>>,
}

impl<V: Clone> InMemoryCollection<V> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_FEED_CAPACITY)
    }

    pub fn with_capacity(name: impl Into<String>, feed_capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(feed_capacity);
        Self {
            name: name.into(),
            docs: RwLock::new(BTreeMap::new()),
            feed,
        }
    }

    fn notify(&self, key: &str, kind: ChangeKind, document: V) {
        // No watchers is fine.
        let _ = self.feed.send(Change {
            key: key.to_string(),
            kind,
            document,
        });
    }

    fn poisoned() -> StoreError {
        StoreError::Storage("lock poisoned".to_string())
    }
}

#[async_trait]
impl<V> DocumentStore<V> for InMemoryCollection<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<V>, StoreError> {
        let docs = self.docs.read().map_err(|_| Self::poisoned())?;
        Ok(docs.get(key).cloned())
    }

    async fn upsert(&self, key: &str, value: V) -> Result<(), StoreError> {
        let kind = {
            let mut docs = self.docs.write().map_err(|_| Self::poisoned())?;
            match docs.insert(key.to_string(), value.clone()) {
                Some(_) => ChangeKind::Modified,
                None => ChangeKind::Added,
            }
        };
        self.notify(key, kind, value);
        Ok(())
    }

    async fn create(&self, key: &str, value: V) -> Result<CreateOutcome<V>, StoreError> {
        {
            let mut docs = self.docs.write().map_err(|_| Self::poisoned())?;
            if let Some(existing) = docs.get(key) {
                return Ok(CreateOutcome::Existing(existing.clone()));
            }
            docs.insert(key.to_string(), value.clone());
        }
        self.notify(key, ChangeKind::Added, value.clone());
        Ok(CreateOutcome::Created(value))
    }

    async fn list(&self) -> Result<Vec<(String, V)>, StoreError> {
        let docs = self.docs.read().map_err(|_| Self::poisoned())?;
        Ok(docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn watch(&self) -> broadcast::Receiver<Change<V>> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_reports_added_then_modified() {
        let col = InMemoryCollection::<u32>::new("numbers");
        let mut feed = col.watch();

        col.upsert("a", 1).await.unwrap();
        col.upsert("a", 2).await.unwrap();

        let first = feed.recv().await.unwrap();
        let second = feed.recv().await.unwrap();
        assert_eq!(first.kind, ChangeKind::Added);
        assert_eq!(second.kind, ChangeKind::Modified);
        assert_eq!(second.document, 2);
        assert_eq!(col.get("a").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn create_keeps_the_first_document() {
        let col = InMemoryCollection::<&'static str>::new("sagas");

        let first = col.create("k", "one").await.unwrap();
        let second = col.create("k", "two").await.unwrap();

        assert!(first.was_created());
        assert_eq!(second, CreateOutcome::Existing("one"));
        assert_eq!(col.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_is_ordered_by_key() {
        let col = InMemoryCollection::<u8>::new("ordered");
        col.upsert("b", 2).await.unwrap();
        col.upsert("a", 1).await.unwrap();
        col.upsert("c", 3).await.unwrap();

        let keys: Vec<_> = col.list().await.unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
