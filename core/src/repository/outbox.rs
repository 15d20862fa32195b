use super::RepositoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An intent to publish, drained by an external publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Unique record id.
    pub id: String,
    /// Destination topic or event type.
    pub topic: String,
    /// Partitioning key (e.g. the webhook id).
    pub key: String,
    /// Message body.
    pub payload: serde_json::Value,
    /// When the record was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the publisher confirmed delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Whether the record still waits for the publisher.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.sent_at.is_none()
    }
}

/// Transactional outbox.
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Append a record.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Conflict`] if the record id was already enqueued.
    async fn enqueue(&self, record: OutboxRecord) -> Result<(), RepositoryError>;

    /// Up to `limit` unsent records in creation order.
    ///
    /// `limit` follows [`super::normalize_limit`].
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn list_pending(&self, limit: i64) -> Result<Vec<OutboxRecord>, RepositoryError>;

    /// Record that the publisher delivered a record. Returns the updated record.
    ///
    /// Marking an already-sent record keeps the first `sent_at`.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] for an unknown id.
    async fn mark_sent(&self, id: &str, at: DateTime<Utc>) -> Result<OutboxRecord, RepositoryError>;
}
