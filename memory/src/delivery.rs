use async_trait::async_trait;
use service_spine_core::repository::{DeliveryLog, DeliveryRecord, RepositoryError, normalize_limit};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Append-only delivery log keyed by webhook id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeliveryLog {
    deliveries: Arc<Mutex<HashMap<String, Vec<DeliveryRecord>>>>,
}

impl InMemoryDeliveryLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryLog for InMemoryDeliveryLog {
    async fn add(&self, record: DeliveryRecord) -> Result<(), RepositoryError> {
        self.deliveries
            .lock()
            .await
            .entry(record.webhook_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn list_by_webhook(
        &self,
        webhook_id: &str,
        limit: i64,
    ) -> Result<Vec<DeliveryRecord>, RepositoryError> {
        let limit = normalize_limit(limit);
        let deliveries = self.deliveries.lock().await;
        let Some(log) = deliveries.get(webhook_id) else {
            return Ok(Vec::new());
        };
        let start = log.len().saturating_sub(limit);
        Ok(log[start..].to_vec())
    }
}
