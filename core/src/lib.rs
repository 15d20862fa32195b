//! # Service Spine Core
//!
//! Core traits and types shared by every service built on the Service Spine host.
//!
//! A service on the spine is a thin domain API sitting on top of a shared
//! request-processing contract: authenticated, idempotent, observable request
//! handling with a canonical response envelope. This crate holds the parts of
//! that contract which have nothing to do with HTTP:
//!
//! - **Environment**: injectable [`Clock`](environment::Clock) and
//!   [`IdGenerator`](environment::IdGenerator)
//! - **Hashing**: canonical JSON and SHA-256 request fingerprints
//! - **Actor**: the authenticated caller of a request
//! - **Errors**: the error taxonomy every service maps onto
//! - **Health**: component checks and the aggregated health report
//! - **Repositories**: storage traits and record types (in-memory
//!   implementations live in `service-spine-memory`)
//!
//! ## Control flow of a mutating request
//!
//! ```text
//! Pipeline → Auth → Handler → Idempotency.get(key, hash)
//!   ├─ replay  → cached response
//!   └─ reserve → domain work → repository writes → metrics → complete
//! ```

pub mod actor;
pub mod environment;
pub mod error;
pub mod hashing;
pub mod health;
pub mod repository;

// Re-export commonly used types
pub use actor::{Actor, Role};
pub use chrono::{DateTime, Utc};
pub use environment::{Clock, IdGenerator, MonotonicIdGenerator, SystemClock};
pub use error::{ErrorKind, ServiceError};
pub use hashing::{HashError, canonical_json, fingerprint};
pub use health::{ComponentCheck, ConfiguredDependency, HealthCheck, HealthReport, HealthStatus};
pub use repository::{Record, RecordStore, RepositoryError};
