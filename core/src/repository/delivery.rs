use super::RepositoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Listing size used when the caller asks for none or too many.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Largest listing size honoured.
pub const MAX_LIST_LIMIT: usize = 200;

/// Clamp a caller-supplied listing limit.
///
/// Values in `1..=200` are kept; anything else becomes 50.
///
/// ```
/// use service_spine_core::repository::normalize_limit;
///
/// assert_eq!(normalize_limit(10), 10);
/// assert_eq!(normalize_limit(0), 50);
/// assert_eq!(normalize_limit(201), 50);
/// ```
#[must_use]
pub fn normalize_limit(limit: i64) -> usize {
    usize::try_from(limit)
        .ok()
        .filter(|limit| (1..=MAX_LIST_LIMIT).contains(limit))
        .unwrap_or(DEFAULT_LIST_LIMIT)
}

/// One delivery attempt of a webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Webhook the attempt belongs to.
    pub webhook_id: String,
    /// When the attempt happened.
    pub delivered_at: DateTime<Utc>,
    /// HTTP status returned by the receiver.
    pub http_status: u16,
    /// Round-trip latency.
    pub latency_ms: u64,
    /// Whether the receiver accepted the delivery.
    pub success: bool,
    /// Whether this was a test delivery.
    pub is_test: bool,
}

/// Append-only delivery log, partitioned by webhook.
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    /// Append a record.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn add(&self, record: DeliveryRecord) -> Result<(), RepositoryError>;

    /// The most recent `limit` records for a webhook, oldest first.
    ///
    /// `limit` follows [`normalize_limit`].
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn list_by_webhook(
        &self,
        webhook_id: &str,
        limit: i64,
    ) -> Result<Vec<DeliveryRecord>, RepositoryError>;
}
