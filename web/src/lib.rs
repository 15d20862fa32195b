//! Axum request pipeline and service host for Service Spine services.
//!
//! Every request passes through the same pipeline:
//!
//! ```text
//! Received → request id → metrics
//!   → auth            (401 unauthorized)
//!   → decode body     (400 invalid_input)
//!   → authorize       (403 forbidden)
//!   → idempotency     (replay | 409 idempotency_conflict | execute)
//!   → envelope
//! ```
//!
//! The host owns request ids, metrics, the fallback and the `/healthz`,
//! `/readyz`, `/health` and `/metrics` endpoints. Domain services plug in
//! through [`DomainService`] and bring their own routes, auth layers and
//! handlers.
//!
//! # Example
//!
//! ```ignore
//! use service_spine_web::{ServiceHost, shutdown_signal};
//!
//! let host = ServiceHost::new(config, Arc::new(SystemClock)).mount(cache_service);
//! host.run(shutdown_signal()).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod envelope;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod host;
pub mod middleware;
pub mod service;
pub mod state;

// Re-export key types for convenience
pub use auth::{AuthPolicy, Authenticated, authenticate};
pub use envelope::{ApiResponse, Replayable};
pub use error::{AppError, ErrorDetail};
pub use extractors::{JsonBody, PathParam, QueryParams};
pub use host::{Cancellation, HostError, ServiceHost, WorkerHost, shutdown_signal};
pub use middleware::{REQUEST_ID_HEADER, RequestId, request_id_layer};
pub use service::DomainService;
pub use state::HostState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
