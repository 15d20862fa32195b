//! Repository traits and record types.
//!
//! Every repository is safe for concurrent use and every operation appears
//! atomic with respect to other operations on the same repository. Reads
//! return owned copies: mutating a returned value never affects storage.
//!
//! | Repository | Trait |
//! |---|---|
//! | Keyed record store | [`RecordStore`] |
//! | Cache | [`CacheStore`] |
//! | Append log (deliveries) | [`DeliveryLog`] |
//! | Outbox | [`Outbox`] |
//! | Event dedup | [`EventDedup`] |
//! | Idempotency | [`IdempotencyStore`] |

mod cache;
mod dedup;
mod delivery;
mod idempotency;
mod outbox;

pub use cache::{CacheEntry, CacheMetrics, CacheStore};
pub use dedup::{DedupRecord, EventDedup};
pub use delivery::{DEFAULT_LIST_LIMIT, DeliveryLog, DeliveryRecord, MAX_LIST_LIMIT, normalize_limit};
pub use idempotency::{IdempotencyRecord, IdempotencyStore};
pub use outbox::{Outbox, OutboxRecord};

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by repositories.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// The record already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend failed.
    #[error("repository failure: {0}")]
    Internal(String),
}

/// A record held by a [`RecordStore`].
pub trait Record: Clone + Send + Sync + 'static {
    /// Key used for deterministic listing order.
    type SortKey: Ord;

    /// Unique id.
    fn record_id(&self) -> &str;

    /// Listing sort key. Ties are broken by id.
    fn sort_key(&self) -> Self::SortKey;
}

/// Keyed record store: create, upsert, get, list, delete.
#[async_trait]
pub trait RecordStore<T: Record>: Send + Sync {
    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Conflict`] if a record with the same id exists.
    async fn create(&self, record: T) -> Result<T, RepositoryError>;

    /// Insert or replace a record.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn upsert(&self, record: T) -> Result<T, RepositoryError>;

    /// Fetch a record by id.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] if absent.
    async fn get(&self, id: &str) -> Result<T, RepositoryError>;

    /// All records ordered by [`Record::sort_key`], then id.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn list(&self) -> Result<Vec<T>, RepositoryError>;

    /// Remove a record and return it.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] if absent.
    async fn delete(&self, id: &str) -> Result<T, RepositoryError>;
}
