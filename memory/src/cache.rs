use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_spine_core::repository::{CacheEntry, CacheMetrics, CacheStore, RepositoryError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
    memory_used_bytes: u64,
}

impl CacheState {
    fn refresh_memory(&mut self) {
        self.memory_used_bytes = self.entries.values().map(CacheEntry::size_bytes).sum();
    }
}

/// TTL cache with lazy eviction on read.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    state: Arc<Mutex<CacheState>>,
}

impl InMemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn put(&self, entry: CacheEntry) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        state.entries.insert(entry.key.clone(), entry);
        state.refresh_memory();
        Ok(())
    }

    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>, RepositoryError> {
        let mut state = self.state.lock().await;
        match state.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let entry = entry.clone();
                state.hits += 1;
                Ok(Some(entry))
            }
            Some(_) => {
                state.entries.remove(key);
                state.evictions += 1;
                state.misses += 1;
                state.refresh_memory();
                Ok(None)
            }
            None => {
                state.misses += 1;
                Ok(None)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        let removed = state.entries.remove(key).is_some();
        if removed {
            state.refresh_memory();
        }
        Ok(removed)
    }

    async fn invalidate(&self, keys: &[String]) -> Result<u64, RepositoryError> {
        let mut state = self.state.lock().await;
        let mut removed = 0;
        for key in keys {
            if state.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            state.refresh_memory();
        }
        Ok(removed)
    }

    async fn memory_used_bytes(&self) -> Result<u64, RepositoryError> {
        Ok(self.state.lock().await.memory_used_bytes)
    }

    async fn metrics(&self) -> Result<CacheMetrics, RepositoryError> {
        let state = self.state.lock().await;
        Ok(CacheMetrics {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            memory_used_bytes: state.memory_used_bytes,
            entries: state.entries.len() as u64,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    fn entry(key: &str, value: &[u8], ttl_seconds: i64) -> CacheEntry {
        CacheEntry {
            key: key.into(),
            value: value.to_vec(),
            stored_at: epoch(),
            expires_at: epoch() + Duration::seconds(ttl_seconds),
        }
    }

    #[tokio::test]
    async fn test_get_counts_hits_and_misses() {
        let cache = InMemoryCache::new();
        cache.put(entry("a", b"1", 60)).await.unwrap();

        assert!(cache.get("a", epoch()).await.unwrap().is_some());
        assert!(cache.get("b", epoch()).await.unwrap().is_none());

        let metrics = cache.metrics().await.unwrap();
        assert_eq!((metrics.hits, metrics.misses, metrics.evictions), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_expired_entry_is_evicted_on_read() {
        let cache = InMemoryCache::new();
        cache.put(entry("a", b"1", 60)).await.unwrap();

        let later = epoch() + Duration::seconds(61);
        assert!(cache.get("a", later).await.unwrap().is_none());

        let metrics = cache.metrics().await.unwrap();
        assert_eq!(metrics.evictions, 1);
        assert_eq!(metrics.entries, 0);
        assert_eq!(metrics.memory_used_bytes, 0);
    }

    #[tokio::test]
    async fn test_delete_absent_is_noop() {
        let cache = InMemoryCache::new();
        assert!(!cache.delete("missing").await.unwrap());
        cache.put(entry("a", b"1", 60)).await.unwrap();
        assert!(cache.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_counts_only_present_keys() {
        let cache = InMemoryCache::new();
        cache.put(entry("a", b"1", 60)).await.unwrap();
        cache.put(entry("b", b"2", 60)).await.unwrap();

        let removed = cache
            .invalidate(&["a".into(), "zzz".into(), "b".into(), "a".into()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn test_memory_is_key_plus_value() {
        let cache = InMemoryCache::new();
        cache.put(entry("key", b"value", 60)).await.unwrap();
        assert_eq!(cache.memory_used_bytes().await.unwrap(), 8);

        cache.put(entry("key", b"v", 60)).await.unwrap();
        assert_eq!(cache.memory_used_bytes().await.unwrap(), 4);
    }

    proptest! {
        #[test]
        fn prop_entry_is_gone_after_ttl(ttl in 1i64..100_000, epsilon in 0i64..1_000) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let cache = InMemoryCache::new();
                cache.put(entry("k", b"v", ttl)).await.unwrap();
                let read_at = epoch() + Duration::seconds(ttl + epsilon);
                assert!(cache.get("k", read_at).await.unwrap().is_none());
            });
        }
    }
}
