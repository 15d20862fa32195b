use super::RepositoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored outcome of an idempotent operation.
///
/// Lifecycle: *reserved* (hash fixed, body empty) then *completed* (body set).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Client-supplied key.
    pub key: String,
    /// Hex digest of the operation's canonical semantic payload.
    pub request_hash: String,
    /// HTTP status of the completed response; 0 while reserved.
    pub response_code: u16,
    /// Serialized response; empty while reserved.
    pub response_body: Vec<u8>,
    /// After this instant the record reads as absent.
    pub expires_at: DateTime<Utc>,
    /// When the record was completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    /// A fresh reservation.
    #[must_use]
    pub fn reserved(key: impl Into<String>, request_hash: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            request_hash: request_hash.into(),
            response_code: 0,
            response_body: Vec::new(),
            expires_at,
            completed_at: None,
        }
    }

    /// Whether a response has been stored.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        !self.response_body.is_empty()
    }

    /// Whether the record reads as absent at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Storage for idempotency records.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Live record for `key`. Expired records are evicted and read as absent.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<IdempotencyRecord>, RepositoryError>;

    /// Reserve `key` for `request_hash` unless a live record exists.
    ///
    /// Returns the record now stored under the key: the new reservation, or
    /// the existing live record untouched (whatever its hash). Callers compare
    /// hashes to detect conflicts.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn reserve(
        &self,
        key: &str,
        request_hash: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<IdempotencyRecord, RepositoryError>;

    /// Store the response for a reserved key.
    ///
    /// A completed record keeps its first response.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] if the key was never reserved or has
    /// been evicted.
    async fn complete(
        &self,
        key: &str,
        response_code: u16,
        response_body: Vec<u8>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}
