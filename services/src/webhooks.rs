//! Webhook manager: subscriptions, test deliveries, inbound event fan-out and
//! the outbox drain surface.
//!
//! User routes (`AuthPolicy::users()`):
//!
//! | Route | Method | Roles | Idempotency |
//! |---|---|---|---|
//! | `/api/v1/webhooks` | `POST` | `user`, `admin` | `Idempotency-Key` required |
//! | `/api/v1/webhooks` | `GET` | any | read-only |
//! | `/api/v1/webhooks/:id` | `GET` | owner, `admin` | read-only |
//! | `/api/v1/webhooks/:id` | `DELETE` | owner, `admin` | natively idempotent |
//! | `/api/v1/webhooks/:id/test` | `POST` | owner, `admin` | `Idempotency-Key` required |
//! | `/api/v1/webhooks/:id/deliveries` | `GET` | owner, `admin` | read-only |
//!
//! Service routes (`AuthPolicy::services()`):
//!
//! | Route | Method | Roles | Idempotency |
//! |---|---|---|---|
//! | `/api/v1/webhooks/inbound` | `POST` | `service`, `admin` | deduplicated by `event_id` |
//! | `/api/v1/outbox/pending` | `GET` | `service`, `admin` | read-only |
//! | `/api/v1/outbox/:id/sent` | `POST` | `service`, `admin` | natively idempotent |
//!
//! Webhooks owned by someone else are reported as `404 not_found`.
//!
//! Create and test are not idempotent by nature: a reservation that was never
//! completed is re-executed on retry and allocates fresh ids. Inbound fan-out
//! uses ids derived from the event and webhook ids, so re-running it never
//! enqueues the same pair twice.

use crate::Context;
use crate::validate;
use axum::{
    Router,
    extract::{DefaultBodyLimit, State},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use service_spine_core::actor::{Actor, Role};
use service_spine_core::environment::{Clock, IdGenerator};
use service_spine_core::hashing::digest_hex;
use service_spine_core::repository::{
    DeliveryLog, DeliveryRecord, EventDedup, Outbox, OutboxRecord, Record, RecordStore,
    RepositoryError,
};
use service_spine_memory::{InMemoryDeliveryLog, InMemoryEventDedup, InMemoryOutbox, InMemoryRecordStore};
use service_spine_runtime::IdempotencyEngine;
use service_spine_web::{
    ApiResponse, AppError, AuthPolicy, Authenticated, DomainService, JsonBody, PathParam,
    QueryParams, Replayable, WebResult, authenticate,
};
use std::sync::Arc;

/// Longest accepted endpoint URL.
pub const MAX_URL_BYTES: usize = 2048;

/// Most distinct event types per webhook.
pub const MAX_EVENT_TYPES: usize = 50;

/// Longest accepted event type.
pub const MAX_EVENT_TYPE_BYTES: usize = 128;

/// Longest accepted inbound event id.
pub const MAX_EVENT_ID_BYTES: usize = 256;

/// Body limit of a test delivery.
pub const TEST_BODY_LIMIT: usize = 64 * 1024;

/// Body limit of an inbound event.
pub const INBOUND_BODY_LIMIT: usize = 256 * 1024;

/// How long a processed inbound event id is remembered.
pub const DEDUP_WINDOW_SECONDS: i64 = 24 * 60 * 60;

/// Outbox topic of test deliveries.
pub const TEST_TOPIC: &str = "webhook.test";

/// Outbox topic of fanned-out inbound events.
pub const EVENT_TOPIC: &str = "webhook.event";

const SUBSCRIBERS: &[Role] = &[Role::User, Role::Admin];
const PUBLISHERS: &[Role] = &[Role::Service, Role::Admin];

/// A registered webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    /// Generated id.
    pub id: String,
    /// Subject that created it.
    pub owner: String,
    /// Absolute http(s) URL.
    pub endpoint_url: String,
    /// Distinct, lowercase event types.
    pub event_types: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Record for Webhook {
    type SortKey = (DateTime<Utc>, String);

    fn record_id(&self) -> &str {
        &self.id
    }

    fn sort_key(&self) -> Self::SortKey {
        (self.created_at, self.id.clone())
    }
}

impl Webhook {
    fn visible_to(&self, actor: &Actor) -> bool {
        actor.role == Role::Admin || self.owner == actor.subject
    }

    fn subscribes_to(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|subscribed| subscribed == event_type)
    }
}

/// Body of a create.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWebhook {
    /// Where deliveries go.
    pub endpoint_url: String,
    /// Subscribed event types.
    pub event_types: Vec<String>,
}

/// Body of a test delivery.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestDelivery {
    /// Arbitrary payload forwarded in the outbox record.
    #[serde(default)]
    pub payload: Value,
}

/// Result of a test delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDeliveryResult {
    /// Target webhook.
    pub webhook_id: String,
    /// Enqueued outbox record.
    pub outbox_id: String,
    /// Appended delivery record.
    pub delivery: DeliveryRecord,
}

/// An event pushed by another service.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
    /// Sender-assigned id used for de-duplication.
    pub event_id: String,
    /// Event type matched against subscriptions.
    pub event_type: String,
    /// Arbitrary payload.
    #[serde(default)]
    pub payload: Value,
}

/// `?limit=N` of the listing routes.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct LimitQuery {
    /// Requested page size; out-of-range values use the default.
    #[serde(default)]
    pub limit: i64,
}

#[derive(Clone)]
struct WebhookState {
    webhooks: Arc<dyn RecordStore<Webhook>>,
    deliveries: Arc<dyn DeliveryLog>,
    outbox: Arc<dyn Outbox>,
    dedup: Arc<dyn EventDedup>,
    idempotency: IdempotencyEngine,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl WebhookState {
    /// The webhook, if `actor` may see it.
    async fn visible(&self, actor: &Actor, id: &str) -> Result<Webhook, AppError> {
        let webhook = self.webhooks.get(id).await?;
        if webhook.visible_to(actor) {
            Ok(webhook)
        } else {
            Err(AppError::not_found(format!("webhook {id} not found")))
        }
    }
}

/// Stores backing the webhook manager.
#[derive(Clone)]
pub struct WebhookStores {
    /// Registered webhooks.
    pub webhooks: Arc<dyn RecordStore<Webhook>>,
    /// Delivery log.
    pub deliveries: Arc<dyn DeliveryLog>,
    /// Outbox.
    pub outbox: Arc<dyn Outbox>,
    /// Inbound de-duplication.
    pub dedup: Arc<dyn EventDedup>,
}

impl WebhookStores {
    /// Fresh in-memory stores.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            webhooks: Arc::new(InMemoryRecordStore::<Webhook>::new("webhook")),
            deliveries: Arc::new(InMemoryDeliveryLog::new()),
            outbox: Arc::new(InMemoryOutbox::new()),
            dedup: Arc::new(InMemoryEventDedup::new()),
        }
    }
}

impl std::fmt::Debug for WebhookStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookStores").finish_non_exhaustive()
    }
}

/// The webhook domain service.
#[derive(Clone)]
pub struct WebhookService {
    state: WebhookState,
}

impl std::fmt::Debug for WebhookService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookService").finish_non_exhaustive()
    }
}

impl WebhookService {
    /// Build over explicit stores.
    #[must_use]
    pub fn new(ctx: &Context, stores: WebhookStores, idempotency: IdempotencyEngine) -> Self {
        Self {
            state: WebhookState {
                webhooks: stores.webhooks,
                deliveries: stores.deliveries,
                outbox: stores.outbox,
                dedup: stores.dedup,
                idempotency,
                clock: Arc::clone(&ctx.clock),
                ids: Arc::clone(&ctx.ids),
            },
        }
    }

    /// Build over in-memory stores.
    #[must_use]
    pub fn in_memory(ctx: &Context) -> Self {
        Self::new(ctx, WebhookStores::in_memory(), ctx.in_memory_idempotency())
    }

    fn user_routes(&self) -> Router {
        Router::new()
            .route("/api/v1/webhooks", get(list_webhooks).post(create_webhook))
            .route(
                "/api/v1/webhooks/:id",
                get(get_webhook).delete(delete_webhook),
            )
            .route(
                "/api/v1/webhooks/:id/test",
                post(test_webhook).layer(DefaultBodyLimit::max(TEST_BODY_LIMIT)),
            )
            .route("/api/v1/webhooks/:id/deliveries", get(list_deliveries))
            .route_layer(from_fn_with_state(AuthPolicy::users(), authenticate))
            .with_state(self.state.clone())
    }

    fn service_routes(&self) -> Router {
        Router::new()
            .route(
                "/api/v1/webhooks/inbound",
                post(receive_inbound).layer(DefaultBodyLimit::max(INBOUND_BODY_LIMIT)),
            )
            .route("/api/v1/outbox/pending", get(list_pending))
            .route("/api/v1/outbox/:id/sent", post(mark_sent))
            .route_layer(from_fn_with_state(AuthPolicy::services(), authenticate))
            .with_state(self.state.clone())
    }
}

#[async_trait::async_trait]
impl DomainService for WebhookService {
    fn name(&self) -> &'static str {
        "webhooks"
    }

    fn routes(&self) -> Router {
        self.user_routes().merge(self.service_routes())
    }
}

async fn create_webhook(
    State(state): State<WebhookState>,
    Authenticated(actor): Authenticated,
    JsonBody(body): JsonBody<CreateWebhook>,
) -> WebResult<Replayable> {
    actor.require_role(SUBSCRIBERS)?;
    let idempotency_key = actor.require_idempotency_key()?.to_string();

    let endpoint_url = validate::http_url("endpoint_url", &body.endpoint_url, MAX_URL_BYTES)?;
    let event_types = validate::distinct_names(
        "event_types",
        &body.event_types,
        MAX_EVENT_TYPES,
        MAX_EVENT_TYPE_BYTES,
    )?;

    let payload = json!({
        "op": "webhook_create",
        "owner": actor.subject,
        "endpoint_url": endpoint_url,
        "event_types": event_types,
    });

    let webhooks = Arc::clone(&state.webhooks);
    let clock = Arc::clone(&state.clock);
    let ids = Arc::clone(&state.ids);
    let stored = state
        .idempotency
        .execute(&idempotency_key, &payload, move || async move {
            let webhook = webhooks
                .create(Webhook {
                    id: ids.next_id("whk"),
                    owner: actor.subject,
                    endpoint_url,
                    event_types,
                    created_at: clock.now(),
                })
                .await?;
            tracing::info!(
                webhook_id = %webhook.id,
                owner = %webhook.owner,
                event_types = webhook.event_types.len(),
                "Webhook created"
            );
            Ok::<_, AppError>((201, webhook))
        })
        .await?;

    Ok(Replayable(stored))
}

async fn list_webhooks(
    State(state): State<WebhookState>,
    Authenticated(actor): Authenticated,
) -> WebResult<ApiResponse<Vec<Webhook>>> {
    let webhooks = state
        .webhooks
        .list()
        .await?
        .into_iter()
        .filter(|webhook| webhook.visible_to(&actor))
        .collect();
    Ok(ApiResponse::ok(webhooks))
}

async fn get_webhook(
    State(state): State<WebhookState>,
    Authenticated(actor): Authenticated,
    PathParam(id): PathParam<String>,
) -> WebResult<ApiResponse<Webhook>> {
    Ok(ApiResponse::ok(state.visible(&actor, &id).await?))
}

/// A second delete of the same id is `404 not_found` and changes nothing.
async fn delete_webhook(
    State(state): State<WebhookState>,
    Authenticated(actor): Authenticated,
    PathParam(id): PathParam<String>,
) -> WebResult<ApiResponse<Webhook>> {
    state.visible(&actor, &id).await?;
    let removed = state.webhooks.delete(&id).await?;
    tracing::info!(webhook_id = %removed.id, "Webhook deleted");
    Ok(ApiResponse::ok(removed).with_message("webhook deleted"))
}

async fn test_webhook(
    State(state): State<WebhookState>,
    Authenticated(actor): Authenticated,
    PathParam(id): PathParam<String>,
    JsonBody(body): JsonBody<TestDelivery>,
) -> WebResult<Replayable> {
    let idempotency_key = actor.require_idempotency_key()?.to_string();
    let webhook = state.visible(&actor, &id).await?;

    let payload = json!({
        "op": "webhook_test",
        "webhook_id": webhook.id,
        "payload": body.payload,
    });

    let deliveries = Arc::clone(&state.deliveries);
    let outbox = Arc::clone(&state.outbox);
    let clock = Arc::clone(&state.clock);
    let ids = Arc::clone(&state.ids);
    let stored = state
        .idempotency
        .execute(&idempotency_key, &payload, move || async move {
            let now = clock.now();
            let delivery = DeliveryRecord {
                webhook_id: webhook.id.clone(),
                delivered_at: now,
                http_status: 200,
                latency_ms: 0,
                success: true,
                is_test: true,
            };
            deliveries.add(delivery.clone()).await?;

            let outbox_id = ids.next_id("obx");
            outbox
                .enqueue(OutboxRecord {
                    id: outbox_id.clone(),
                    topic: TEST_TOPIC.to_string(),
                    key: webhook.id.clone(),
                    payload: json!({
                        "webhook_id": webhook.id,
                        "endpoint_url": webhook.endpoint_url,
                        "payload": body.payload,
                    }),
                    created_at: now,
                    sent_at: None,
                })
                .await?;
            tracing::info!(webhook_id = %webhook.id, outbox_id = %outbox_id, "Test delivery enqueued");

            Ok::<_, AppError>((
                202,
                TestDeliveryResult {
                    webhook_id: webhook.id,
                    outbox_id,
                    delivery,
                },
            ))
        })
        .await?;

    Ok(Replayable(stored))
}

async fn list_deliveries(
    State(state): State<WebhookState>,
    Authenticated(actor): Authenticated,
    PathParam(id): PathParam<String>,
    QueryParams(query): QueryParams<LimitQuery>,
) -> WebResult<ApiResponse<Vec<DeliveryRecord>>> {
    let webhook = state.visible(&actor, &id).await?;
    let records = state.deliveries.list_by_webhook(&webhook.id, query.limit).await?;
    Ok(ApiResponse::ok(records))
}

/// Outbox id of one (event, webhook) pair.
fn fanout_id(event_id: &str, webhook_id: &str) -> String {
    let digest = digest_hex(format!("{event_id}\n{webhook_id}").as_bytes());
    format!("obx_evt_{}", &digest[..32])
}

/// Duplicate event ids are answered with `200 {"duplicate":true}` and have
/// no effect. A check and a mark racing for the same new id may both fan
/// out; the derived outbox ids keep that to one record per webhook.
async fn receive_inbound(
    State(state): State<WebhookState>,
    Authenticated(actor): Authenticated,
    JsonBody(event): JsonBody<InboundEvent>,
) -> WebResult<ApiResponse<Value>> {
    actor.require_role(PUBLISHERS)?;
    let event_id = validate::required("event_id", &event.event_id, MAX_EVENT_ID_BYTES)?;
    let event_type = validate::name("event_type", &event.event_type, MAX_EVENT_TYPE_BYTES)?;

    let now = state.clock.now();
    if state.dedup.is_duplicate(&event_id, now).await? {
        tracing::debug!(event_id = %event_id, "Duplicate inbound event ignored");
        return Ok(ApiResponse::ok(json!({"duplicate": true})));
    }

    let subscribers: Vec<Webhook> = state
        .webhooks
        .list()
        .await?
        .into_iter()
        .filter(|webhook| webhook.subscribes_to(&event_type))
        .collect();

    let mut fanout = 0_u64;
    for webhook in &subscribers {
        let record = OutboxRecord {
            id: fanout_id(&event_id, &webhook.id),
            topic: EVENT_TOPIC.to_string(),
            key: webhook.id.clone(),
            payload: json!({
                "event_id": event_id,
                "event_type": event_type,
                "webhook_id": webhook.id,
                "endpoint_url": webhook.endpoint_url,
                "payload": event.payload,
            }),
            created_at: now,
            sent_at: None,
        };
        match state.outbox.enqueue(record).await {
            Ok(()) => fanout += 1,
            Err(RepositoryError::Conflict(_)) => {}
            Err(error) => return Err(error.into()),
        }
    }

    let expires_at = now
        .checked_add_signed(Duration::seconds(DEDUP_WINDOW_SECONDS))
        .ok_or_else(|| AppError::internal("dedup expiry out of range"))?;
    state
        .dedup
        .mark_processed(&event_id, &event_type, expires_at)
        .await?;
    tracing::info!(
        event_id = %event_id,
        event_type = %event_type,
        fanout,
        "Inbound event fanned out"
    );

    Ok(ApiResponse::accepted(json!({
        "duplicate": false,
        "event_id": event_id,
        "fanout": fanout,
    })))
}

async fn list_pending(
    State(state): State<WebhookState>,
    Authenticated(actor): Authenticated,
    QueryParams(query): QueryParams<LimitQuery>,
) -> WebResult<ApiResponse<Vec<OutboxRecord>>> {
    actor.require_role(PUBLISHERS)?;
    Ok(ApiResponse::ok(state.outbox.list_pending(query.limit).await?))
}

/// Natively idempotent: marking a sent record again keeps the first `sent_at`.
async fn mark_sent(
    State(state): State<WebhookState>,
    Authenticated(actor): Authenticated,
    PathParam(id): PathParam<String>,
) -> WebResult<ApiResponse<OutboxRecord>> {
    actor.require_role(PUBLISHERS)?;
    let record = state.outbox.mark_sent(&id, state.clock.now()).await?;
    tracing::debug!(outbox_id = %record.id, "Outbox record marked sent");
    Ok(ApiResponse::ok(record))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use service_spine_testing::test_time;

    fn webhook(owner: &str, event_types: &[&str]) -> Webhook {
        Webhook {
            id: "whk_1".into(),
            owner: owner.into(),
            endpoint_url: "https://example.com/hook".into(),
            event_types: event_types.iter().map(ToString::to_string).collect(),
            created_at: test_time(),
        }
    }

    #[test]
    fn test_visibility() {
        let hook = webhook("alice", &["submission.created"]);
        assert!(hook.visible_to(&Actor::new("alice", Role::User, "req-1")));
        assert!(!hook.visible_to(&Actor::new("bob", Role::User, "req-1")));
        assert!(hook.visible_to(&Actor::new("bob", Role::Admin, "req-1")));
    }

    #[test]
    fn test_subscription_match_is_exact() {
        let hook = webhook("alice", &["submission.created"]);
        assert!(hook.subscribes_to("submission.created"));
        assert!(!hook.subscribes_to("submission"));
    }

    #[test]
    fn test_fanout_id_is_stable_and_distinct() {
        assert_eq!(fanout_id("evt-1", "whk_1"), fanout_id("evt-1", "whk_1"));
        assert_ne!(fanout_id("evt-1", "whk_1"), fanout_id("evt-1", "whk_2"));
        assert_ne!(fanout_id("evt-1", "whk_1"), fanout_id("evt-2", "whk_1"));
        assert!(fanout_id("a/b c", "whk_1").starts_with("obx_evt_"));
    }
}
