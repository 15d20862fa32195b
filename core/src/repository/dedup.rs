use super::RepositoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A processed inbound event, remembered until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRecord {
    /// Event id supplied by the sender.
    pub event_id: String,
    /// Event type.
    pub event_type: String,
    /// When the memory of this event lapses.
    pub expires_at: DateTime<Utc>,
}

/// Inbound event de-duplication.
#[async_trait]
pub trait EventDedup: Send + Sync {
    /// Whether the event was already processed. Expired entries are evicted
    /// before answering.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn is_duplicate(&self, event_id: &str, now: DateTime<Utc>) -> Result<bool, RepositoryError>;

    /// Remember an event until `expires_at`.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn mark_processed(
        &self,
        event_id: &str,
        event_type: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}
