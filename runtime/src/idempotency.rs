//! Idempotency engine: reserve, execute, complete, replay.
//!
//! A mutating handler hands the engine its idempotency key, the *semantic*
//! payload of the operation, and the work to run. The engine:
//!
//! 1. Hashes the payload (canonical JSON, SHA-256).
//! 2. Looks up the key. A live record with the same hash and a stored body is
//!    replayed; a record with a different hash is an `idempotency_conflict`;
//!    a reservation with an empty body falls through.
//! 3. Reserves the key for the hash. Losing a race to a different hash is also
//!    an `idempotency_conflict`.
//! 4. Runs the work and serializes its result.
//! 5. Completes the record. This step is best-effort: a failure is logged and
//!    the fresh response is still returned, since the domain write already
//!    happened.
//!
//! A reservation that was never completed (crash, cancelled request, failed
//! completion) is re-executed on retry. Handlers document whether their domain
//! writes tolerate that.

use chrono::Duration;
use serde::Serialize;
use service_spine_core::environment::Clock;
use service_spine_core::hashing::{HashError, fingerprint};
use service_spine_core::repository::{IdempotencyRecord, IdempotencyStore, RepositoryError};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Default record lifetime: 7 days.
pub const DEFAULT_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Longest record lifetime accepted: 365 days.
pub const MAX_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Errors raised by the engine itself (as opposed to the wrapped work).
#[derive(Error, Debug)]
pub enum IdempotencyError {
    /// The key was already used for a different request.
    #[error("idempotency key {key} was already used with a different request")]
    Conflict {
        /// The reused key.
        key: String,
    },

    /// The semantic payload could not be hashed.
    #[error(transparent)]
    Hash(#[from] HashError),

    /// The work's result could not be serialized.
    #[error("response could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The idempotency store failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Response produced by an idempotent operation, fresh or replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    /// HTTP status.
    pub status: u16,
    /// Serialized result (JSON).
    pub body: Vec<u8>,
    /// Whether this came from a stored record.
    pub replayed: bool,
}

impl StoredResponse {
    fn replay(record: IdempotencyRecord) -> Self {
        Self {
            status: record.response_code,
            body: record.response_body,
            replayed: true,
        }
    }
}

/// Reserve/complete engine over an [`IdempotencyStore`].
#[derive(Clone)]
pub struct IdempotencyEngine {
    store: Arc<dyn IdempotencyStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl std::fmt::Debug for IdempotencyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyEngine")
            .field("ttl_seconds", &self.ttl.num_seconds())
            .finish_non_exhaustive()
    }
}

impl IdempotencyEngine {
    /// Create an engine. `ttl_seconds` is clamped to `1..=MAX_TTL_SECONDS`.
    #[must_use]
    pub fn new(store: Arc<dyn IdempotencyStore>, clock: Arc<dyn Clock>, ttl_seconds: u64) -> Self {
        let seconds = ttl_seconds.clamp(1, MAX_TTL_SECONDS);
        let ttl = Duration::seconds(i64::try_from(seconds).unwrap_or(1));
        Self { store, clock, ttl }
    }

    /// Record lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Run `work` at most once per `(key, payload)` within the TTL window.
    ///
    /// `work` returns the HTTP status and a serializable result. The result is
    /// stored as JSON and returned in [`StoredResponse::body`]; replays return
    /// the stored bytes unchanged.
    ///
    /// # Errors
    ///
    /// Errors from `work` are returned unchanged and nothing is stored (the
    /// reservation stays empty). Engine failures are converted with
    /// `E: From<IdempotencyError>`.
    pub async fn execute<P, T, E, F, Fut>(
        &self,
        key: &str,
        payload: &P,
        work: F,
    ) -> Result<StoredResponse, E>
    where
        P: Serialize + ?Sized,
        T: Serialize,
        E: From<IdempotencyError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(u16, T), E>>,
    {
        let hash = fingerprint(payload).map_err(IdempotencyError::from)?;
        let now = self.clock.now();

        if let Some(existing) = self.store.get(key, now).await.map_err(IdempotencyError::from)? {
            if let Some(replayed) = self.check_existing(key, &hash, existing)? {
                return Ok(replayed);
            }
        }

        let reserved = self
            .store
            .reserve(key, &hash, now, now + self.ttl)
            .await
            .map_err(IdempotencyError::from)?;
        if let Some(replayed) = self.check_existing(key, &hash, reserved)? {
            return Ok(replayed);
        }

        let (status, result) = work().await?;
        let body = serde_json::to_vec(&result).map_err(IdempotencyError::from)?;

        if let Err(error) = self
            .store
            .complete(key, status, body.clone(), self.clock.now())
            .await
        {
            tracing::warn!(
                idempotency_key = key,
                error = %error,
                "Failed to complete idempotency record; a retry will re-execute"
            );
        }

        Ok(StoredResponse {
            status,
            body,
            replayed: false,
        })
    }

    /// Replay, reject, or let the caller proceed with a live record.
    fn check_existing(
        &self,
        key: &str,
        hash: &str,
        record: IdempotencyRecord,
    ) -> Result<Option<StoredResponse>, IdempotencyError> {
        if record.request_hash != hash {
            tracing::debug!(idempotency_key = key, "Idempotency key reused with a different payload");
            return Err(IdempotencyError::Conflict {
                key: key.to_string(),
            });
        }
        if record.is_completed() {
            tracing::debug!(idempotency_key = key, ttl_seconds = self.ttl.num_seconds(), "Replaying stored response");
            return Ok(Some(StoredResponse::replay(record)));
        }
        Ok(None)
    }
}
