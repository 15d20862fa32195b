use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_spine_core::repository::{Outbox, OutboxRecord, RepositoryError, normalize_limit};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct OutboxState {
    // Insertion order; `index` maps id -> position.
    records: Vec<OutboxRecord>,
    index: HashMap<String, usize>,
}

/// Outbox kept as an insertion-ordered log.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOutbox {
    state: Arc<Mutex<OutboxState>>,
}

impl InMemoryOutbox {
    /// Create an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Outbox for InMemoryOutbox {
    async fn enqueue(&self, record: OutboxRecord) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if state.index.contains_key(&record.id) {
            return Err(RepositoryError::Conflict(format!(
                "outbox record {} already enqueued",
                record.id
            )));
        }
        let position = state.records.len();
        state.index.insert(record.id.clone(), position);
        state.records.push(record);
        Ok(())
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<OutboxRecord>, RepositoryError> {
        let limit = normalize_limit(limit);
        let mut pending: Vec<OutboxRecord> = {
            let state = self.state.lock().await;
            state
                .records
                .iter()
                .filter(|record| record.is_pending())
                .cloned()
                .collect()
        };
        // Stable: equal timestamps keep insertion order.
        pending.sort_by_key(|record| record.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_sent(&self, id: &str, at: DateTime<Utc>) -> Result<OutboxRecord, RepositoryError> {
        let mut state = self.state.lock().await;
        let position = *state
            .index
            .get(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("outbox record {id}")))?;
        let record = state
            .records
            .get_mut(position)
            .ok_or_else(|| RepositoryError::Internal(format!("outbox index out of sync for {id}")))?;
        if record.sent_at.is_none() {
            record.sent_at = Some(at);
        }
        Ok(record.clone())
    }
}
