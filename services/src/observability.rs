//! Observability service: operator-maintained component health.
//!
//! Components written here are reported by the host's `/health` endpoint.
//! A critical component in `degraded` or `unhealthy` makes the whole report
//! `unhealthy`.
//!
//! | Route | Method | Roles | Idempotency |
//! |---|---|---|---|
//! | `/api/v1/observability/components` | `GET` | any | read-only |
//! | `/api/v1/observability/components/:name` | `GET` | any | read-only |
//! | `/api/v1/observability/components/:name` | `PUT` | `admin` | `Idempotency-Key` required |
//! | `/api/v1/observability/components/:name` | `DELETE` | `admin` | natively idempotent |
//!
//! An upsert whose reservation was never completed is re-executed on retry;
//! the upsert rewrites the same fields with a fresh `updated_at`.

use crate::Context;
use crate::validate;
use axum::{Router, extract::State, middleware::from_fn_with_state, routing::get};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use service_spine_core::actor::Role;
use service_spine_core::environment::Clock;
use service_spine_core::health::{ComponentCheck, HealthStatus};
use service_spine_core::repository::{Record, RecordStore};
use service_spine_memory::InMemoryRecordStore;
use service_spine_runtime::IdempotencyEngine;
use service_spine_web::{
    ApiResponse, AppError, AuthPolicy, Authenticated, DomainService, JsonBody, PathParam,
    Replayable, WebResult, authenticate,
};
use std::sync::Arc;

/// Longest accepted component name.
pub const MAX_NAME_BYTES: usize = 128;

/// Longest accepted component message.
pub const MAX_MESSAGE_BYTES: usize = 512;

const ADMINS: &[Role] = &[Role::Admin];

/// A component whose status operators report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    /// Lowercase, trimmed name.
    pub name: String,
    /// Reported status.
    pub status: HealthStatus,
    /// Observed latency.
    pub latency_ms: u64,
    /// Whether a failure fails the service.
    pub critical: bool,
    /// Operator note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Last write.
    pub updated_at: DateTime<Utc>,
    /// Subject of the last writer.
    pub updated_by: String,
}

impl Record for Component {
    type SortKey = String;

    fn record_id(&self) -> &str {
        &self.name
    }

    fn sort_key(&self) -> String {
        self.name.clone()
    }
}

impl Component {
    /// The health check this component contributes.
    #[must_use]
    pub fn to_check(&self) -> ComponentCheck {
        let mut check = ComponentCheck::new(self.name.clone(), self.status).with_latency_ms(self.latency_ms);
        if !self.critical {
            check = check.non_critical();
        }
        if let Some(message) = &self.message {
            check = check.with_message(message.clone());
        }
        check
    }
}

/// Body of an upsert.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertRequest {
    /// One of `healthy`, `degraded`, `unhealthy`.
    pub status: String,
    /// Observed latency; must not be negative.
    #[serde(default)]
    pub latency_ms: i64,
    /// Defaults to `true`.
    #[serde(default)]
    pub critical: Option<bool>,
    /// Optional note.
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone)]
struct ObservabilityState {
    components: Arc<dyn RecordStore<Component>>,
    idempotency: IdempotencyEngine,
    clock: Arc<dyn Clock>,
}

/// The observability domain service.
#[derive(Clone)]
pub struct ObservabilityService {
    state: ObservabilityState,
}

impl std::fmt::Debug for ObservabilityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservabilityService").finish_non_exhaustive()
    }
}

impl ObservabilityService {
    /// Build over explicit stores.
    #[must_use]
    pub fn new(
        ctx: &Context,
        components: Arc<dyn RecordStore<Component>>,
        idempotency: IdempotencyEngine,
    ) -> Self {
        Self {
            state: ObservabilityState {
                components,
                idempotency,
                clock: Arc::clone(&ctx.clock),
            },
        }
    }

    /// Build over in-memory stores.
    #[must_use]
    pub fn in_memory(ctx: &Context) -> Self {
        Self::new(
            ctx,
            Arc::new(InMemoryRecordStore::<Component>::new("component")),
            ctx.in_memory_idempotency(),
        )
    }
}

#[async_trait::async_trait]
impl DomainService for ObservabilityService {
    fn name(&self) -> &'static str {
        "observability"
    }

    fn routes(&self) -> Router {
        Router::new()
            .route("/api/v1/observability/components", get(list_components))
            .route(
                "/api/v1/observability/components/:name",
                get(get_component).put(upsert_component).delete(delete_component),
            )
            .route_layer(from_fn_with_state(AuthPolicy::users(), authenticate))
            .with_state(self.state.clone())
    }

    async fn component_checks(&self) -> Vec<ComponentCheck> {
        match self.state.components.list().await {
            Ok(components) => components.iter().map(Component::to_check).collect(),
            Err(error) => {
                tracing::warn!(error = %error, "Failed to list components for health report");
                vec![
                    ComponentCheck::new("observability", HealthStatus::Unhealthy)
                        .with_message(error.to_string()),
                ]
            }
        }
    }
}

async fn upsert_component(
    State(state): State<ObservabilityState>,
    Authenticated(actor): Authenticated,
    PathParam(name): PathParam<String>,
    JsonBody(body): JsonBody<UpsertRequest>,
) -> WebResult<Replayable> {
    actor.require_role(ADMINS)?;
    let idempotency_key = actor.require_idempotency_key()?.to_string();

    let name = validate::name("name", &name, MAX_NAME_BYTES)?;
    let status = HealthStatus::parse(&body.status).ok_or_else(|| {
        AppError::invalid_input("status must be one of healthy, degraded, unhealthy")
    })?;
    let latency_ms = u64::try_from(body.latency_ms)
        .map_err(|_| AppError::invalid_input("latency_ms must not be negative"))?;
    let critical = body.critical.unwrap_or(true);
    let message = validate::optional("message", body.message.as_deref(), MAX_MESSAGE_BYTES)?;

    let payload = json!({
        "op": "component_upsert",
        "name": name,
        "status": status,
        "latency_ms": latency_ms,
        "critical": critical,
        "message": message,
    });

    let components = Arc::clone(&state.components);
    let clock = Arc::clone(&state.clock);
    let stored = state
        .idempotency
        .execute(&idempotency_key, &payload, move || async move {
            let component = components
                .upsert(Component {
                    name,
                    status,
                    latency_ms,
                    critical,
                    message,
                    updated_at: clock.now(),
                    updated_by: actor.subject,
                })
                .await?;
            tracing::info!(
                component = %component.name,
                status = %component.status,
                critical = component.critical,
                "Component status updated"
            );
            Ok::<_, AppError>((200, component))
        })
        .await?;

    Ok(Replayable(stored))
}

async fn list_components(
    State(state): State<ObservabilityState>,
    Authenticated(_actor): Authenticated,
) -> WebResult<ApiResponse<Vec<Component>>> {
    Ok(ApiResponse::ok(state.components.list().await?))
}

async fn get_component(
    State(state): State<ObservabilityState>,
    Authenticated(_actor): Authenticated,
    PathParam(name): PathParam<String>,
) -> WebResult<ApiResponse<Component>> {
    let name = validate::name("name", &name, MAX_NAME_BYTES)?;
    Ok(ApiResponse::ok(state.components.get(&name).await?))
}

/// A second delete of the same name is `404 not_found` and changes nothing.
async fn delete_component(
    State(state): State<ObservabilityState>,
    Authenticated(actor): Authenticated,
    PathParam(name): PathParam<String>,
) -> WebResult<ApiResponse<Component>> {
    actor.require_role(ADMINS)?;
    let name = validate::name("name", &name, MAX_NAME_BYTES)?;
    let removed = state.components.delete(&name).await?;
    tracing::info!(component = %removed.name, "Component removed");
    Ok(ApiResponse::ok(removed).with_message("component deleted"))
}
