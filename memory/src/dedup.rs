use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_spine_core::repository::{DedupRecord, EventDedup, RepositoryError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Processed-event memory with lazy expiry.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventDedup {
    events: Arc<Mutex<HashMap<String, DedupRecord>>>,
}

impl InMemoryEventDedup {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventDedup for InMemoryEventDedup {
    async fn is_duplicate(&self, event_id: &str, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let mut events = self.events.lock().await;
        events.retain(|_, record| record.expires_at > now);
        Ok(events.contains_key(event_id))
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        event_type: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.events.lock().await.insert(
            event_id.to_string(),
            DedupRecord {
                event_id: event_id.to_string(),
                event_type: event_type.to_string(),
                expires_at,
            },
        );
        Ok(())
    }
}
