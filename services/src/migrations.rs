//! Data-migration planning: plans describe a migration, runs queue one.
//!
//! | Route | Method | Roles | Idempotency |
//! |---|---|---|---|
//! | `/plans` | `POST` | `migration_operator`, `admin` | `Idempotency-Key` required |
//! | `/plans` | `GET` | any | read-only |
//! | `/plans/:id` | `GET` | any | read-only |
//! | `/runs` | `POST` | `migration_operator` + MFA | `Idempotency-Key` required |
//! | `/runs/:id` | `GET` | any | read-only |
//! | `/runs/:id/rollback` | `POST` | any | always `410 gone` |
//!
//! Runs are only queued here; executing them is the worker's business.

use crate::Context;
use crate::validate;
use axum::{
    Router,
    extract::State,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use service_spine_core::actor::Role;
use service_spine_core::environment::{Clock, IdGenerator};
use service_spine_core::repository::{Record, RecordStore, RepositoryError};
use service_spine_memory::InMemoryRecordStore;
use service_spine_runtime::IdempotencyEngine;
use service_spine_web::{
    ApiResponse, AppError, AuthPolicy, Authenticated, DomainService, JsonBody, PathParam,
    Replayable, WebResult, authenticate,
};
use std::sync::Arc;

/// Longest accepted plan name.
pub const MAX_NAME_BYTES: usize = 128;

/// Longest accepted source or target.
pub const MAX_ENDPOINT_BYTES: usize = 512;

/// Longest accepted step.
pub const MAX_STEP_BYTES: usize = 1024;

/// Most steps in one plan.
pub const MAX_STEPS: usize = 100;

const PLANNERS: &[Role] = &[Role::MigrationOperator, Role::Admin];
const RUNNERS: &[Role] = &[Role::MigrationOperator];

/// A migration plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Generated id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Where data comes from.
    pub source: String,
    /// Where data goes.
    pub target: String,
    /// Ordered steps.
    pub steps: Vec<String>,
    /// Subject that created it.
    pub created_by: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Record for Plan {
    type SortKey = (DateTime<Utc>, String);

    fn record_id(&self) -> &str {
        &self.id
    }

    fn sort_key(&self) -> Self::SortKey {
        (self.created_at, self.id.clone())
    }
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Accepted, not yet picked up.
    Queued,
}

/// A queued execution of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    /// Generated id.
    pub id: String,
    /// Plan being run.
    pub plan_id: String,
    /// Current status.
    pub status: RunStatus,
    /// Subject that requested it.
    pub requested_by: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Record for Run {
    type SortKey = (DateTime<Utc>, String);

    fn record_id(&self) -> &str {
        &self.id
    }

    fn sort_key(&self) -> Self::SortKey {
        (self.created_at, self.id.clone())
    }
}

/// Body of a plan create.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePlan {
    /// Plan name.
    pub name: String,
    /// Source system.
    pub source: String,
    /// Target system.
    pub target: String,
    /// Ordered steps.
    pub steps: Vec<String>,
}

impl CreatePlan {
    fn normalize(&self) -> Result<Self, AppError> {
        if self.steps.is_empty() || self.steps.len() > MAX_STEPS {
            return Err(AppError::invalid_input(format!(
                "steps must have between 1 and {MAX_STEPS} entries"
            )));
        }
        let steps = self
            .steps
            .iter()
            .map(|step| validate::required("steps", step, MAX_STEP_BYTES))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: validate::required("name", &self.name, MAX_NAME_BYTES)?,
            source: validate::required("source", &self.source, MAX_ENDPOINT_BYTES)?,
            target: validate::required("target", &self.target, MAX_ENDPOINT_BYTES)?,
            steps,
        })
    }
}

/// Body of a run request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRun {
    /// Plan to run.
    pub plan_id: String,
}

#[derive(Clone)]
struct MigrationState {
    plans: Arc<dyn RecordStore<Plan>>,
    runs: Arc<dyn RecordStore<Run>>,
    idempotency: IdempotencyEngine,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

/// The migration domain service.
#[derive(Clone)]
pub struct MigrationService {
    state: MigrationState,
}

impl std::fmt::Debug for MigrationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationService").finish_non_exhaustive()
    }
}

impl MigrationService {
    /// Build over explicit stores.
    #[must_use]
    pub fn new(
        ctx: &Context,
        plans: Arc<dyn RecordStore<Plan>>,
        runs: Arc<dyn RecordStore<Run>>,
        idempotency: IdempotencyEngine,
    ) -> Self {
        Self {
            state: MigrationState {
                plans,
                runs,
                idempotency,
                clock: Arc::clone(&ctx.clock),
                ids: Arc::clone(&ctx.ids),
            },
        }
    }

    /// Build over in-memory stores.
    #[must_use]
    pub fn in_memory(ctx: &Context) -> Self {
        Self::new(
            ctx,
            Arc::new(InMemoryRecordStore::<Plan>::new("plan")),
            Arc::new(InMemoryRecordStore::<Run>::new("run")),
            ctx.in_memory_idempotency(),
        )
    }
}

#[async_trait::async_trait]
impl DomainService for MigrationService {
    fn name(&self) -> &'static str {
        "migrations"
    }

    fn routes(&self) -> Router {
        Router::new()
            .route("/plans", get(list_plans).post(create_plan))
            .route("/plans/:id", get(get_plan))
            .route("/runs", post(create_run))
            .route("/runs/:id", get(get_run))
            .route("/runs/:id/rollback", post(rollback_run))
            .route_layer(from_fn_with_state(AuthPolicy::users(), authenticate))
            .with_state(self.state.clone())
    }
}

/// A retry after an incomplete reservation creates a second plan.
async fn create_plan(
    State(state): State<MigrationState>,
    Authenticated(actor): Authenticated,
    JsonBody(body): JsonBody<CreatePlan>,
) -> WebResult<Replayable> {
    actor.require_role(PLANNERS)?;
    let idempotency_key = actor.require_idempotency_key()?.to_string();
    let body = body.normalize()?;

    let payload = json!({
        "op": "plan_create",
        "name": body.name,
        "source": body.source,
        "target": body.target,
        "steps": body.steps,
    });

    let plans = Arc::clone(&state.plans);
    let clock = Arc::clone(&state.clock);
    let ids = Arc::clone(&state.ids);
    let stored = state
        .idempotency
        .execute(&idempotency_key, &payload, move || async move {
            let plan = plans
                .create(Plan {
                    id: ids.next_id("plan"),
                    name: body.name,
                    source: body.source,
                    target: body.target,
                    steps: body.steps,
                    created_by: actor.subject,
                    created_at: clock.now(),
                })
                .await?;
            tracing::info!(plan_id = %plan.id, steps = plan.steps.len(), "Migration plan created");
            Ok::<_, AppError>((201, plan))
        })
        .await?;

    Ok(Replayable(stored))
}

async fn list_plans(
    State(state): State<MigrationState>,
    Authenticated(_actor): Authenticated,
) -> WebResult<ApiResponse<Vec<Plan>>> {
    Ok(ApiResponse::ok(state.plans.list().await?))
}

async fn get_plan(
    State(state): State<MigrationState>,
    Authenticated(_actor): Authenticated,
    PathParam(id): PathParam<String>,
) -> WebResult<ApiResponse<Plan>> {
    Ok(ApiResponse::ok(state.plans.get(&id).await?))
}

/// The plan is checked before the key is reserved, so an unknown `plan_id`
/// does not bind the key. A retry after an incomplete reservation queues a
/// second run.
async fn create_run(
    State(state): State<MigrationState>,
    Authenticated(actor): Authenticated,
    JsonBody(body): JsonBody<CreateRun>,
) -> WebResult<Replayable> {
    actor.require_role(RUNNERS)?;
    actor.require_mfa()?;
    let idempotency_key = actor.require_idempotency_key()?.to_string();
    let plan_id = validate::required("plan_id", &body.plan_id, MAX_NAME_BYTES)?;

    let plan = state.plans.get(&plan_id).await.map_err(|error| match error {
        RepositoryError::NotFound(_) => AppError::not_found(format!("plan {plan_id} not found")),
        other => other.into(),
    })?;

    let payload = json!({"op": "run_create", "plan_id": plan.id});

    let runs = Arc::clone(&state.runs);
    let clock = Arc::clone(&state.clock);
    let ids = Arc::clone(&state.ids);
    let stored = state
        .idempotency
        .execute(&idempotency_key, &payload, move || async move {
            let run = runs
                .create(Run {
                    id: ids.next_id("run"),
                    plan_id: plan.id,
                    status: RunStatus::Queued,
                    requested_by: actor.subject,
                    created_at: clock.now(),
                })
                .await?;
            tracing::info!(run_id = %run.id, plan_id = %run.plan_id, "Migration run queued");
            Ok::<_, AppError>((201, run))
        })
        .await?;

    Ok(Replayable(stored))
}

async fn get_run(
    State(state): State<MigrationState>,
    Authenticated(_actor): Authenticated,
    PathParam(id): PathParam<String>,
) -> WebResult<ApiResponse<Run>> {
    Ok(ApiResponse::ok(state.runs.get(&id).await?))
}

async fn rollback_run(
    Authenticated(_actor): Authenticated,
    PathParam(id): PathParam<String>,
) -> AppError {
    tracing::debug!(run_id = %id, "Rollback requested while disabled");
    AppError::gone("rollback is disabled")
}
