//! Cache service: TTL key/value entries behind the service API.
//!
//! | Route | Method | Roles | Idempotency |
//! |---|---|---|---|
//! | `/v1/cache/:key` | `POST` (put) | `service`, `admin` | `Idempotency-Key` required |
//! | `/v1/cache/:key` | `GET` | any | read-only |
//! | `/v1/cache/:key` | `DELETE` | `service`, `admin` | natively idempotent |
//! | `/v1/invalidate` | `POST` | `service`, `admin` | natively idempotent |
//! | `/v1/stats` | `GET` | any | read-only |
//!
//! Values travel base64-encoded and are stored as raw bytes. A put whose
//! reservation was never completed is re-executed on retry; the entry is
//! overwritten with the same value and a fresh `stored_at`.

use crate::Context;
use crate::validate;
use axum::{
    Router,
    extract::State,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use service_spine_core::actor::Role;
use service_spine_core::environment::Clock;
use service_spine_core::repository::{CacheEntry, CacheMetrics, CacheStore};
use service_spine_memory::InMemoryCache;
use service_spine_runtime::IdempotencyEngine;
use service_spine_web::{
    ApiResponse, AppError, AuthPolicy, Authenticated, DomainService, JsonBody, PathParam,
    Replayable, WebResult, authenticate,
};
use std::sync::Arc;

/// Longest accepted key.
pub const MAX_KEY_BYTES: usize = 512;

/// Longest accepted TTL: 365 days.
pub const MAX_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Most keys accepted by one invalidate call.
pub const MAX_INVALIDATE_KEYS: usize = 1000;

const WRITERS: &[Role] = &[Role::Service, Role::Admin];

/// Body of a put.
#[derive(Debug, Clone, Deserialize)]
pub struct PutRequest {
    /// Base64-encoded value.
    pub value: String,
    /// Entry lifetime; zero or negative uses the configured default.
    #[serde(default)]
    pub ttl_seconds: i64,
}

/// Result of a put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResponse {
    /// Stored key.
    pub key: String,
    /// When the entry was written.
    pub stored_at: DateTime<Utc>,
    /// Applied TTL.
    pub ttl_seconds: u64,
}

/// A live entry as returned by `GET`.
#[derive(Debug, Clone, Serialize)]
pub struct EntryView {
    /// Key.
    pub key: String,
    /// Base64-encoded value.
    pub value: String,
    /// When the entry was written.
    pub stored_at: DateTime<Utc>,
    /// When the entry expires.
    pub expires_at: DateTime<Utc>,
    /// Whole seconds until expiry.
    pub ttl_remaining_seconds: i64,
}

/// Body of an invalidate call.
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    /// Keys to remove.
    pub keys: Vec<String>,
}

#[derive(Clone)]
struct CacheState {
    cache: Arc<dyn CacheStore>,
    idempotency: IdempotencyEngine,
    clock: Arc<dyn Clock>,
    default_ttl_seconds: u64,
}

/// The cache domain service.
#[derive(Clone)]
pub struct CacheService {
    state: CacheState,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("default_ttl_seconds", &self.state.default_ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl CacheService {
    /// Build over explicit stores.
    #[must_use]
    pub fn new(ctx: &Context, cache: Arc<dyn CacheStore>, idempotency: IdempotencyEngine) -> Self {
        Self {
            state: CacheState {
                cache,
                idempotency,
                clock: Arc::clone(&ctx.clock),
                default_ttl_seconds: ctx.config.cache.default_ttl_seconds,
            },
        }
    }

    /// Build over in-memory stores.
    #[must_use]
    pub fn in_memory(ctx: &Context) -> Self {
        Self::new(ctx, Arc::new(InMemoryCache::new()), ctx.in_memory_idempotency())
    }
}

#[async_trait::async_trait]
impl DomainService for CacheService {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn routes(&self) -> Router {
        Router::new()
            .route(
                "/v1/cache/:key",
                get(get_entry).post(put_entry).delete(delete_entry),
            )
            .route("/v1/invalidate", post(invalidate))
            .route("/v1/stats", get(stats))
            .route_layer(from_fn_with_state(AuthPolicy::services(), authenticate))
            .with_state(self.state.clone())
    }
}

fn resolve_ttl(requested: i64, default_ttl_seconds: u64) -> Result<u64, AppError> {
    let ttl = u64::try_from(requested)
        .ok()
        .filter(|ttl| *ttl > 0)
        .unwrap_or(default_ttl_seconds);
    if ttl > MAX_TTL_SECONDS {
        return Err(AppError::invalid_input(format!(
            "ttl_seconds must be at most {MAX_TTL_SECONDS}"
        )));
    }
    Ok(ttl)
}

async fn put_entry(
    State(state): State<CacheState>,
    Authenticated(actor): Authenticated,
    PathParam(key): PathParam<String>,
    JsonBody(body): JsonBody<PutRequest>,
) -> WebResult<Replayable> {
    actor.require_role(WRITERS)?;
    let idempotency_key = actor.require_idempotency_key()?.to_string();

    let key = validate::required("key", &key, MAX_KEY_BYTES)?;
    let value = BASE64
        .decode(body.value.trim())
        .map_err(|_| AppError::invalid_input("value must be base64"))?;
    if value.is_empty() {
        return Err(AppError::invalid_input("value must not be empty"));
    }
    let ttl_seconds = resolve_ttl(body.ttl_seconds, state.default_ttl_seconds)?;

    let payload = json!({
        "op": "put",
        "key": key,
        "value": BASE64.encode(&value),
        "ttl": ttl_seconds,
    });

    let cache = Arc::clone(&state.cache);
    let clock = Arc::clone(&state.clock);
    let stored = state
        .idempotency
        .execute(&idempotency_key, &payload, move || async move {
            let now = clock.now();
            let expires_at = i64::try_from(ttl_seconds)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|ttl| now.checked_add_signed(ttl))
                .ok_or_else(|| AppError::invalid_input("ttl_seconds is out of range"))?;

            cache
                .put(CacheEntry {
                    key: key.clone(),
                    value,
                    stored_at: now,
                    expires_at,
                })
                .await?;
            tracing::info!(key = %key, ttl_seconds, "Cache entry stored");

            Ok::<_, AppError>((
                201,
                PutResponse {
                    key,
                    stored_at: now,
                    ttl_seconds,
                },
            ))
        })
        .await?;

    Ok(Replayable(stored))
}

async fn get_entry(
    State(state): State<CacheState>,
    Authenticated(_actor): Authenticated,
    PathParam(key): PathParam<String>,
) -> WebResult<ApiResponse<EntryView>> {
    let key = validate::required("key", &key, MAX_KEY_BYTES)?;
    let now = state.clock.now();
    let entry = state
        .cache
        .get(&key, now)
        .await?
        .ok_or_else(|| AppError::not_found(format!("cache key {key} not found")))?;

    Ok(ApiResponse::ok(EntryView {
        ttl_remaining_seconds: (entry.expires_at - now).num_seconds().max(0),
        value: BASE64.encode(&entry.value),
        key: entry.key,
        stored_at: entry.stored_at,
        expires_at: entry.expires_at,
    }))
}

/// Natively idempotent: deleting an absent key reports `deleted: false`.
async fn delete_entry(
    State(state): State<CacheState>,
    Authenticated(actor): Authenticated,
    PathParam(key): PathParam<String>,
) -> WebResult<ApiResponse<serde_json::Value>> {
    actor.require_role(WRITERS)?;
    let key = validate::required("key", &key, MAX_KEY_BYTES)?;
    let deleted = state.cache.delete(&key).await?;
    tracing::info!(key = %key, deleted, "Cache entry deleted");
    Ok(ApiResponse::ok(json!({"key": key, "deleted": deleted})))
}

/// Natively idempotent: a second call removes nothing.
async fn invalidate(
    State(state): State<CacheState>,
    Authenticated(actor): Authenticated,
    JsonBody(body): JsonBody<InvalidateRequest>,
) -> WebResult<ApiResponse<serde_json::Value>> {
    actor.require_role(WRITERS)?;
    if body.keys.is_empty() {
        return Err(AppError::invalid_input("keys must not be empty"));
    }
    if body.keys.len() > MAX_INVALIDATE_KEYS {
        return Err(AppError::invalid_input(format!(
            "keys must have at most {MAX_INVALIDATE_KEYS} entries"
        )));
    }
    let keys = body
        .keys
        .iter()
        .map(|key| validate::required("keys", key, MAX_KEY_BYTES))
        .collect::<Result<Vec<_>, _>>()?;

    let invalidated = state.cache.invalidate(&keys).await?;
    tracing::info!(requested = keys.len(), invalidated, "Cache keys invalidated");
    Ok(ApiResponse::ok(json!({"invalidated": invalidated})))
}

async fn stats(
    State(state): State<CacheState>,
    Authenticated(_actor): Authenticated,
) -> WebResult<ApiResponse<CacheMetrics>> {
    Ok(ApiResponse::ok(state.cache.metrics().await?))
}
