//! # Service Spine Runtime
//!
//! The stateful parts of the request-processing contract that do not depend
//! on HTTP.
//!
//! ## Core Components
//!
//! - **Metrics Registry**: counters and histograms with label sets, rendered
//!   in Prometheus text format
//! - **Idempotency Engine**: reserve/execute/complete/replay around an
//!   idempotency store
//! - **Config**: typed service configuration from defaults, TOML and the
//!   environment
//!
//! ## Example
//!
//! ```ignore
//! use service_spine_runtime::{Config, IdempotencyEngine, MetricsRegistry};
//!
//! let config = Config::from_env()?;
//! let metrics = MetricsRegistry::new();
//! let idempotency = IdempotencyEngine::new(store, clock, config.idempotency_ttl_seconds);
//!
//! let response = idempotency
//!     .execute(key, &json!({"op": "put", "key": key}), || async {
//!         cache.put(entry).await?;
//!         Ok((201, stored))
//!     })
//!     .await?;
//! ```

/// Typed configuration
pub mod config;

/// Reserve/complete idempotency engine
pub mod idempotency;

/// Prometheus-style metrics registry
pub mod metrics;

pub use config::{Config, ConfigError};
pub use idempotency::{IdempotencyEngine, IdempotencyError, StoredResponse};
pub use metrics::{HttpMetrics, MetricPoint, MetricValue, MetricsRegistry};
