//! State shared by the host-owned endpoints.

use crate::service::DomainService;
use futures::future::join_all;
use service_spine_core::environment::Clock;
use service_spine_core::health::{HealthCheck, HealthReport};
use service_spine_runtime::HttpMetrics;
use std::sync::Arc;

/// State of `/health` and `/metrics`.
///
/// Domain services keep their own state; this only carries what the host
/// itself serves.
#[derive(Clone)]
pub struct HostState {
    service_id: Arc<str>,
    metrics: HttpMetrics,
    checks: Arc<[Arc<dyn HealthCheck>]>,
    services: Arc<[Arc<dyn DomainService>]>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostState")
            .field("service_id", &self.service_id)
            .field("checks", &self.checks.len())
            .field("services", &self.services.len())
            .finish_non_exhaustive()
    }
}

impl HostState {
    /// Create the host state.
    #[must_use]
    pub fn new(
        service_id: &str,
        metrics: HttpMetrics,
        checks: Vec<Arc<dyn HealthCheck>>,
        services: Vec<Arc<dyn DomainService>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            service_id: Arc::from(service_id),
            metrics,
            checks: checks.into(),
            services: services.into(),
            clock,
        }
    }

    /// Service id.
    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Request metrics recorder.
    #[must_use]
    pub const fn metrics(&self) -> &HttpMetrics {
        &self.metrics
    }

    /// Run every check and aggregate the report.
    ///
    /// Static checks run concurrently; components reported by domain services
    /// are added afterwards and win on a name clash.
    pub async fn health_report(&self) -> HealthReport {
        let mut checks = join_all(self.checks.iter().map(|check| check.check())).await;
        for components in join_all(self.services.iter().map(|service| service.component_checks())).await {
            checks.extend(components);
        }
        HealthReport::from_checks(self.service_id.as_ref(), checks, self.clock.now())
    }
}
