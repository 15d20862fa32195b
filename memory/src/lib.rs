//! # Service Spine Memory
//!
//! In-memory implementations of the repository traits in
//! `service_spine_core::repository`.
//!
//! Each store guards its map or log with a single `tokio::sync::Mutex`. Lock
//! scope is the smallest region that keeps the store's invariants; values are
//! cloned under the lock and everything else happens outside it. No store
//! calls another while holding its lock.
//!
//! Data is lost on restart. Replacement backends must keep the same
//! operation contracts.
//!
//! # Example
//!
//! ```
//! use chrono::Duration;
//! use service_spine_core::repository::{CacheEntry, CacheStore};
//! use service_spine_core::{DateTime, Utc};
//! use service_spine_memory::InMemoryCache;
//!
//! # async fn demo() -> Result<(), service_spine_core::RepositoryError> {
//! let cache = InMemoryCache::new();
//! let now = DateTime::<Utc>::UNIX_EPOCH;
//! cache
//!     .put(CacheEntry {
//!         key: "k".into(),
//!         value: b"v".to_vec(),
//!         stored_at: now,
//!         expires_at: now + Duration::seconds(60),
//!     })
//!     .await?;
//! assert!(cache.get("k", now).await?.is_some());
//! assert!(cache.get("k", now + Duration::seconds(61)).await?.is_none());
//! # Ok(())
//! # }
//! ```

mod cache;
mod dedup;
mod delivery;
mod idempotency;
mod outbox;
mod records;

pub use cache::InMemoryCache;
pub use dedup::InMemoryEventDedup;
pub use delivery::InMemoryDeliveryLog;
pub use idempotency::InMemoryIdempotencyStore;
pub use outbox::InMemoryOutbox;
pub use records::InMemoryRecordStore;
