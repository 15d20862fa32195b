//! Domain services for the Service Spine host.
//!
//! Each module binds a narrow domain API to the shared pipeline:
//!
//! | Module | Routes | Auth |
//! |---|---|---|
//! | [`cache`] | `/v1/cache/:key`, `/v1/invalidate`, `/v1/stats` | service APIs |
//! | [`observability`] | `/api/v1/observability/components[/:name]` | user APIs |
//! | [`webhooks`] | `/api/v1/webhooks/...`, `/api/v1/outbox/...` | user and service APIs |
//! | [`migrations`] | `/plans`, `/runs` | user APIs |
//!
//! Every mutating endpoint either is idempotent by nature (noted on the
//! handler) or runs through the idempotency engine keyed by
//! `Idempotency-Key`.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bootstrap;
pub mod cache;
pub mod migrations;
pub mod observability;
pub mod validate;
pub mod webhooks;

use service_spine_core::environment::{Clock, IdGenerator, MonotonicIdGenerator, SystemClock};
use service_spine_core::repository::IdempotencyStore;
use service_spine_memory::InMemoryIdempotencyStore;
use service_spine_runtime::{Config, IdempotencyEngine};
use std::sync::Arc;

pub use cache::CacheService;
pub use migrations::MigrationService;
pub use observability::ObservabilityService;
pub use webhooks::WebhookService;

/// What every domain service is built from.
#[derive(Clone)]
pub struct Context {
    /// Service configuration.
    pub config: Arc<Config>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Identifier source.
    pub ids: Arc<dyn IdGenerator>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("service_id", &self.config.service_id)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Build a context from explicit parts.
    #[must_use]
    pub fn new(config: Config, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            config: Arc::new(config),
            clock,
            ids,
        }
    }

    /// Wall clock and monotonic ids.
    #[must_use]
    pub fn system(config: Config) -> Self {
        Self::new(config, Arc::new(SystemClock), Arc::new(MonotonicIdGenerator::new()))
    }

    /// Idempotency engine over `store` with the configured TTL.
    #[must_use]
    pub fn idempotency(&self, store: Arc<dyn IdempotencyStore>) -> IdempotencyEngine {
        IdempotencyEngine::new(store, Arc::clone(&self.clock), self.config.idempotency_ttl_seconds)
    }

    /// Idempotency engine over a fresh in-memory store.
    #[must_use]
    pub fn in_memory_idempotency(&self) -> IdempotencyEngine {
        self.idempotency(Arc::new(InMemoryIdempotencyStore::new()))
    }
}
