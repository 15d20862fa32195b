//! Endpoints every host serves.

pub mod health;
pub mod metrics;

pub use health::{health, healthz, readyz};
pub use metrics::metrics;
