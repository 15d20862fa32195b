use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_spine_core::repository::{IdempotencyRecord, IdempotencyStore, RepositoryError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Idempotency records keyed by client key.
///
/// `reserve` and `complete` run under the same lock, so a reader sees either
/// the empty reservation or the final body, never anything in between.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdempotencyStore {
    records: Arc<Mutex<HashMap<String, IdempotencyRecord>>>,
}

impl InMemoryIdempotencyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<IdempotencyRecord>, RepositoryError> {
        let mut records = self.records.lock().await;
        match records.get(key) {
            Some(record) if record.is_expired(now) => {
                records.remove(key);
                Ok(None)
            }
            found => Ok(found.cloned()),
        }
    }

    async fn reserve(
        &self,
        key: &str,
        request_hash: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<IdempotencyRecord, RepositoryError> {
        let mut records = self.records.lock().await;
        if let Some(existing) = records.get(key) {
            if !existing.is_expired(now) {
                return Ok(existing.clone());
            }
        }
        let record = IdempotencyRecord::reserved(key, request_hash, expires_at);
        records.insert(key.to_string(), record.clone());
        Ok(record)
    }

    async fn complete(
        &self,
        key: &str,
        response_code: u16,
        response_body: Vec<u8>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| RepositoryError::NotFound(format!("idempotency key {key}")))?;
        if !record.is_completed() {
            record.response_code = response_code;
            record.response_body = response_body;
            record.completed_at = Some(at);
        }
        Ok(())
    }
}
