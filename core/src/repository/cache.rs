use super::RepositoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached value with an absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key (trimmed, non-empty, at most 512 bytes).
    pub key: String,
    /// Opaque value bytes.
    pub value: Vec<u8>,
    /// When the entry was written.
    pub stored_at: DateTime<Utc>,
    /// When the entry stops being readable.
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Whether the entry is no longer readable at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Approximate footprint: key length plus value length.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        (self.key.len() + self.value.len()) as u64
    }
}

/// Cache counters and gauges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetrics {
    /// Reads that found a live entry.
    pub hits: u64,
    /// Reads that found nothing or an expired entry.
    pub misses: u64,
    /// Entries removed because their TTL elapsed.
    pub evictions: u64,
    /// Approximate bytes held (last writer wins).
    pub memory_used_bytes: u64,
    /// Number of entries currently stored, expired or not.
    pub entries: u64,
}

/// TTL cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Store or replace an entry.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn put(&self, entry: CacheEntry) -> Result<(), RepositoryError>;

    /// Read an entry. An expired entry is removed and reported as absent.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>, RepositoryError>;

    /// Remove an entry. Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn delete(&self, key: &str) -> Result<bool, RepositoryError>;

    /// Remove several entries. Returns how many were actually present.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn invalidate(&self, keys: &[String]) -> Result<u64, RepositoryError>;

    /// Approximate memory held by stored entries.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn memory_used_bytes(&self) -> Result<u64, RepositoryError>;

    /// Snapshot of the cache counters.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn metrics(&self) -> Result<CacheMetrics, RepositoryError>;
}
