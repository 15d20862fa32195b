//! Component health checks and the aggregated health report.
//!
//! Overall status rules:
//!
//! - any **critical** component that is `degraded` or `unhealthy` makes the
//!   report `unhealthy`
//! - non-critical components are informational and never downgrade it
//! - with no failing critical component the report is `healthy`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Health status of a component or of the whole service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully operational.
    Healthy,
    /// Working, but slow or at reduced capacity.
    Degraded,
    /// Not operational.
    Unhealthy,
}

impl HealthStatus {
    /// Parse a lowercase status name.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "healthy" => Some(Self::Healthy),
            "degraded" => Some(Self::Degraded),
            "unhealthy" => Some(Self::Unhealthy),
            _ => None,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of checking one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name (lowercase).
    pub name: String,
    /// Component status.
    pub status: HealthStatus,
    /// Whether a failure of this component fails the service.
    pub critical: bool,
    /// Observed latency, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Free-form detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentCheck {
    /// A critical check with the given status.
    #[must_use]
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            critical: true,
            latency_ms: None,
            message: None,
        }
    }

    /// Mark as informational.
    #[must_use]
    pub const fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    /// Attach latency.
    #[must_use]
    pub const fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Attach a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Whether this check fails the service.
    #[must_use]
    pub const fn is_failing(&self) -> bool {
        self.critical && !self.status.is_healthy()
    }
}

/// Aggregated health of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall status.
    pub status: HealthStatus,
    /// Service id.
    pub service: String,
    /// Component checks keyed by name.
    pub checks: BTreeMap<String, ComponentCheck>,
    /// When the report was produced.
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Aggregate component checks into a report.
    ///
    /// When two checks share a name the later one wins.
    #[must_use]
    pub fn from_checks(
        service: impl Into<String>,
        checks: impl IntoIterator<Item = ComponentCheck>,
        checked_at: DateTime<Utc>,
    ) -> Self {
        let checks: BTreeMap<String, ComponentCheck> = checks
            .into_iter()
            .map(|check| (check.name.clone(), check))
            .collect();
        let status = overall_status(checks.values());
        Self {
            status,
            service: service.into(),
            checks,
            checked_at,
        }
    }

    /// Whether the report is `healthy`.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}

/// Overall status of a set of checks.
#[must_use]
pub fn overall_status<'a>(checks: impl IntoIterator<Item = &'a ComponentCheck>) -> HealthStatus {
    if checks.into_iter().any(ComponentCheck::is_failing) {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Healthy
    }
}

/// A component that can report its own health.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Component name used as the key in the report.
    fn name(&self) -> &str;

    /// Check the component. Should complete quickly.
    async fn check(&self) -> ComponentCheck;
}

/// Health check for an external dependency known only by its configured URL.
///
/// There is no client to probe, so the check reports `healthy` when a URL is
/// configured and `degraded` (non-critical) when it is not.
#[derive(Debug, Clone)]
pub struct ConfiguredDependency {
    name: String,
    url: Option<String>,
}

impl ConfiguredDependency {
    /// Create a check for a dependency.
    #[must_use]
    pub fn new(name: impl Into<String>, url: Option<String>) -> Self {
        Self {
            name: name.into(),
            url: url.filter(|url| !url.trim().is_empty()),
        }
    }
}

#[async_trait]
impl HealthCheck for ConfiguredDependency {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> ComponentCheck {
        match &self.url {
            Some(_) => ComponentCheck::new(&self.name, HealthStatus::Healthy)
                .with_message("configured"),
            None => ComponentCheck::new(&self.name, HealthStatus::Degraded)
                .non_critical()
                .with_message("not configured"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    #[test]
    fn test_empty_report_is_healthy() {
        let report = HealthReport::from_checks("svc", Vec::new(), at());
        assert_eq!(report.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_critical_degraded_is_unhealthy() {
        let report = HealthReport::from_checks(
            "svc",
            vec![
                ComponentCheck::new("database", HealthStatus::Degraded).with_latency_ms(5_000),
                ComponentCheck::new("cache", HealthStatus::Healthy),
            ],
            at(),
        );
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.checks["database"].status, HealthStatus::Degraded);
    }

    #[test]
    fn test_non_critical_never_downgrades() {
        let report = HealthReport::from_checks(
            "svc",
            vec![ComponentCheck::new("kafka", HealthStatus::Unhealthy).non_critical()],
            at(),
        );
        assert_eq!(report.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(HealthStatus::parse(" Degraded"), Some(HealthStatus::Degraded));
        assert_eq!(HealthStatus::parse("broken"), None);
    }

    #[tokio::test]
    async fn test_configured_dependency() {
        let present = ConfiguredDependency::new("redis", Some("redis://localhost".into()));
        assert_eq!(present.check().await.status, HealthStatus::Healthy);

        let missing = ConfiguredDependency::new("redis", Some(String::new()));
        let check = missing.check().await;
        assert_eq!(check.status, HealthStatus::Degraded);
        assert!(!check.critical);
    }

    fn arb_check() -> impl Strategy<Value = ComponentCheck> {
        (
            "[a-z]{1,6}",
            prop_oneof![
                Just(HealthStatus::Healthy),
                Just(HealthStatus::Degraded),
                Just(HealthStatus::Unhealthy)
            ],
            any::<bool>(),
        )
            .prop_map(|(name, status, critical)| {
                let check = ComponentCheck::new(name, status);
                if critical { check } else { check.non_critical() }
            })
    }

    proptest! {
        #[test]
        fn prop_overall_matches_critical_components(checks in prop::collection::vec(arb_check(), 0..8)) {
            let report = HealthReport::from_checks("svc", checks, at());
            let failing = report
                .checks
                .values()
                .any(|check| check.critical && check.status != HealthStatus::Healthy);
            let expected = if failing { HealthStatus::Unhealthy } else { HealthStatus::Healthy };
            prop_assert_eq!(report.status, expected);
        }

        #[test]
        fn prop_adding_non_critical_keeps_status(
            checks in prop::collection::vec(arb_check(), 0..6),
            status in prop_oneof![Just(HealthStatus::Degraded), Just(HealthStatus::Unhealthy)]
        ) {
            let before = HealthReport::from_checks("svc", checks.clone(), at()).status;
            let mut extended = checks;
            extended.push(ComponentCheck::new("zz_informational", status).non_critical());
            let after = HealthReport::from_checks("svc", extended, at()).status;
            prop_assert_eq!(before, after);
        }
    }
}
