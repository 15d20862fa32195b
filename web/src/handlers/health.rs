//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health. They are not wrapped in the success envelope.

use crate::state::HostState;
use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};
use service_spine_core::health::HealthReport;

/// Liveness. Does not check dependencies.
///
/// ```text
/// GET /healthz  ->  200 {"status":"ok"}
/// ```
#[allow(clippy::unused_async)]
pub async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Readiness.
///
/// ```text
/// GET /readyz  ->  200 {"status":"ready"}
/// ```
#[allow(clippy::unused_async)]
pub async fn readyz() -> Json<Value> {
    Json(json!({"status": "ready"}))
}

/// Full health report.
///
/// # Status Codes
///
/// - 200 OK: overall `healthy`
/// - 503 Service Unavailable: anything else
pub async fn health(State(state): State<HostState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.health_report().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        tracing::warn!(status = %report.status, "Health check failing");
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use service_spine_core::health::{ComponentCheck, HealthCheck, HealthStatus};
    use service_spine_runtime::{HttpMetrics, MetricsRegistry};
    use service_spine_testing::test_clock;
    use std::sync::Arc;

    struct Fixed(ComponentCheck);

    #[async_trait]
    impl HealthCheck for Fixed {
        fn name(&self) -> &str {
            &self.0.name
        }

        async fn check(&self) -> ComponentCheck {
            self.0.clone()
        }
    }

    fn state(checks: Vec<Arc<dyn HealthCheck>>) -> HostState {
        HostState::new(
            "svc",
            HttpMetrics::new(MetricsRegistry::new(), "svc"),
            checks,
            Vec::new(),
            Arc::new(test_clock()),
        )
    }

    #[tokio::test]
    async fn test_liveness_and_readiness() {
        assert_eq!(healthz().await.0, json!({"status": "ok"}));
        assert_eq!(readyz().await.0, json!({"status": "ready"}));
    }

    #[tokio::test]
    async fn test_healthy_report_is_200() {
        let state = state(vec![Arc::new(Fixed(ComponentCheck::new(
            "database",
            HealthStatus::Healthy,
        )))]);
        let (status, Json(report)) = health(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.service, "svc");
        assert_eq!(report.checks["database"].status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_degraded_critical_component_is_503() {
        let state = state(vec![
            Arc::new(Fixed(ComponentCheck::new("database", HealthStatus::Degraded))),
            Arc::new(Fixed(
                ComponentCheck::new("cdn", HealthStatus::Unhealthy).non_critical(),
            )),
        ]);
        let (status, Json(report)) = health(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_non_critical_failure_keeps_200() {
        let state = state(vec![Arc::new(Fixed(
            ComponentCheck::new("cdn", HealthStatus::Unhealthy).non_critical(),
        ))]);
        let (status, _) = health(State(state)).await;
        assert_eq!(status, StatusCode::OK);
    }
}
