//! The seam between the host and a domain service.

use axum::Router;
use service_spine_core::health::{ComponentCheck, HealthCheck};
use std::sync::Arc;

/// A domain service mounted on a [`ServiceHost`](crate::ServiceHost).
///
/// `routes` returns a router with its own state already applied and its
/// own auth layers in place; the host adds request ids, metrics, the
/// fallback and its own endpoints around it.
///
/// ```ignore
/// struct CacheService { state: CacheState }
///
/// #[async_trait]
/// impl DomainService for CacheService {
///     fn name(&self) -> &str { "cache" }
///     fn routes(&self) -> Router { cache::routes(self.state.clone()) }
/// }
/// ```
#[async_trait::async_trait]
pub trait DomainService: Send + Sync + 'static {
    /// Short name, used in logs.
    fn name(&self) -> &str;

    /// Routes served by this service.
    fn routes(&self) -> Router;

    /// Fixed dependency checks, run on every `/health` request.
    fn health_checks(&self) -> Vec<Arc<dyn HealthCheck>> {
        Vec::new()
    }

    /// Components whose status the service tracks itself.
    async fn component_checks(&self) -> Vec<ComponentCheck> {
        Vec::new()
    }
}
