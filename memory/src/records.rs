use async_trait::async_trait;
use service_spine_core::repository::{Record, RecordStore, RepositoryError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Keyed record store backed by a `HashMap`.
///
/// Cloning the store shares the underlying map.
#[derive(Debug)]
pub struct InMemoryRecordStore<T> {
    kind: &'static str,
    records: Arc<Mutex<HashMap<String, T>>>,
}

impl<T> Clone for InMemoryRecordStore<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            records: Arc::clone(&self.records),
        }
    }
}

impl<T> InMemoryRecordStore<T> {
    /// Create an empty store. `kind` names the record type in error messages.
    #[must_use]
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    fn missing(&self, id: &str) -> RepositoryError {
        RepositoryError::NotFound(format!("{} {id}", self.kind))
    }
}

#[async_trait]
impl<T: Record> RecordStore<T> for InMemoryRecordStore<T> {
    async fn create(&self, record: T) -> Result<T, RepositoryError> {
        let mut records = self.records.lock().await;
        let id = record.record_id().to_string();
        if records.contains_key(&id) {
            return Err(RepositoryError::Conflict(format!("{} {id} already exists", self.kind)));
        }
        records.insert(id, record.clone());
        Ok(record)
    }

    async fn upsert(&self, record: T) -> Result<T, RepositoryError> {
        self.records
            .lock()
            .await
            .insert(record.record_id().to_string(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<T, RepositoryError> {
        let found = self.records.lock().await.get(id).cloned();
        found.ok_or_else(|| self.missing(id))
    }

    async fn list(&self) -> Result<Vec<T>, RepositoryError> {
        let mut records: Vec<T> = self.records.lock().await.values().cloned().collect();
        records.sort_by(|left, right| {
            left.sort_key()
                .cmp(&right.sort_key())
                .then_with(|| left.record_id().cmp(right.record_id()))
        });
        Ok(records)
    }

    async fn delete(&self, id: &str) -> Result<T, RepositoryError> {
        let removed = self.records.lock().await.remove(id);
        removed.ok_or_else(|| self.missing(id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Plan {
        id: String,
        rank: u32,
        steps: Vec<String>,
    }

    impl Record for Plan {
        type SortKey = u32;

        fn record_id(&self) -> &str {
            &self.id
        }

        fn sort_key(&self) -> u32 {
            self.rank
        }
    }

    fn plan(id: &str, rank: u32) -> Plan {
        Plan {
            id: id.into(),
            rank,
            steps: vec!["copy".into()],
        }
    }

    #[tokio::test]
    async fn test_create_conflicts_on_existing_id() {
        let store = InMemoryRecordStore::new("plan");
        store.create(plan("p1", 1)).await.unwrap();

        let err = store.create(plan("p1", 2)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(store.get("p1").await.unwrap().rank, 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store: InMemoryRecordStore<Plan> = InMemoryRecordStore::new("plan");
        let err = store.get("nope").await.unwrap_err();
        assert_eq!(err, RepositoryError::NotFound("plan nope".into()));
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let store = InMemoryRecordStore::new("plan");
        store.create(plan("p1", 1)).await.unwrap();
        store.upsert(plan("p1", 9)).await.unwrap();
        assert_eq!(store.get("p1").await.unwrap().rank, 9);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_list_is_sorted_with_id_tiebreak() {
        let store = InMemoryRecordStore::new("plan");
        for (id, rank) in [("c", 2), ("b", 1), ("a", 2)] {
            store.create(plan(id, rank)).await.unwrap();
        }
        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, ["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryRecordStore::new("plan");
        store.create(plan("p1", 1)).await.unwrap();
        assert_eq!(store.delete("p1").await.unwrap().id, "p1");
        assert!(store.is_empty().await);
        assert!(matches!(
            store.delete("p1").await.unwrap_err(),
            RepositoryError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_returned_records_are_copies() {
        let store = InMemoryRecordStore::new("plan");
        store.create(plan("p1", 1)).await.unwrap();

        let mut listed = store.list().await.unwrap();
        listed[0].steps.push("tampered".into());
        listed.clear();

        let mut fetched = store.get("p1").await.unwrap();
        fetched.steps.clear();

        assert_eq!(store.get("p1").await.unwrap().steps, vec!["copy".to_string()]);
    }
}
