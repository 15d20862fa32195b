//! Bearer authentication for protected route groups.
//!
//! Headers consumed:
//!
//! | Header | Meaning |
//! |---|---|
//! | `Authorization: Bearer <subject>` | required; subject must be non-empty after trimming |
//! | `X-Actor-Role` | role, lowercased; defaults per route group |
//! | `Idempotency-Key` | optional; blank counts as absent |
//! | `X-MFA-Verified` | `true` sets the MFA flag |
//!
//! The middleware places an [`Actor`] in the request extensions; handlers
//! take it with the [`Authenticated`] extractor.
//!
//! ```ignore
//! let routes = Router::new()
//!     .route("/v1/cache/:key", get(get_entry).post(put_entry))
//!     .route_layer(from_fn_with_state(AuthPolicy::services(), authenticate));
//! ```

use crate::error::AppError;
use crate::middleware::{RequestId, synthesize_request_id};
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_spine_core::actor::{Actor, Role};

/// Role header.
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
/// Idempotency key header.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
/// MFA flag header.
pub const MFA_VERIFIED_HEADER: &str = "x-mfa-verified";

/// Authentication settings of one route group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPolicy {
    default_role: Role,
}

impl AuthPolicy {
    /// Routes called by end users; role defaults to `user`.
    #[must_use]
    pub const fn users() -> Self {
        Self {
            default_role: Role::User,
        }
    }

    /// Routes called by other services; role defaults to `service`.
    #[must_use]
    pub const fn services() -> Self {
        Self {
            default_role: Role::Service,
        }
    }

    /// Role assumed when `X-Actor-Role` is absent.
    #[must_use]
    pub const fn default_role(&self) -> &Role {
        &self.default_role
    }

    /// Build the actor for a request.
    ///
    /// # Errors
    ///
    /// Returns `401 unauthorized` if the bearer token is missing or blank.
    pub fn actor_from_headers(&self, headers: &HeaderMap, request_id: &str) -> Result<Actor, AppError> {
        let subject = bearer_subject(headers)
            .ok_or_else(|| AppError::unauthorized("missing or empty bearer token"))?;

        let role = header_str(headers, ACTOR_ROLE_HEADER)
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map_or_else(|| self.default_role.clone(), Role::parse);

        let idempotency_key = header_str(headers, IDEMPOTENCY_KEY_HEADER).map(str::to_string);
        let mfa_verified = header_str(headers, MFA_VERIFIED_HEADER)
            .is_some_and(|raw| raw.trim() == "true");

        Ok(Actor::new(subject, role, request_id)
            .with_idempotency_key(idempotency_key)
            .with_mfa(mfa_verified))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn bearer_subject(headers: &HeaderMap) -> Option<&str> {
    let raw = header_str(headers, header::AUTHORIZATION.as_str())?.trim();
    let (scheme, subject) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let subject = subject.trim();
    (!subject.is_empty()).then_some(subject)
}

/// Middleware authenticating a route group.
///
/// # Errors
///
/// Returns `401 unauthorized` when the bearer token is missing or blank.
pub async fn authenticate(
    State(policy): State<AuthPolicy>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map_or_else(synthesize_request_id, |id| id.0.clone());

    let actor = policy.actor_from_headers(req.headers(), &request_id)?;
    tracing::debug!(subject = %actor.subject, role = %actor.role, "Authenticated request");

    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

/// The authenticated caller.
///
/// Rejects with `401 unauthorized` if the route is not behind
/// [`authenticate`].
#[derive(Debug, Clone)]
pub struct Authenticated(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Actor>()
            .cloned()
            .map(Self)
            .ok_or_else(|| AppError::unauthorized("request is not authenticated"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{Router, middleware::from_fn_with_state, routing::get};
    use service_spine_testing::{TestRequest, error_code, read_json};
    use tower::ServiceExt;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_missing_or_blank_bearer_is_rejected() {
        let policy = AuthPolicy::users();
        assert!(policy.actor_from_headers(&headers(&[]), "r").is_err());
        assert!(policy
            .actor_from_headers(&headers(&[("authorization", "Bearer    ")]), "r")
            .is_err());
        assert!(policy
            .actor_from_headers(&headers(&[("authorization", "Basic abc")]), "r")
            .is_err());
    }

    #[test]
    fn test_defaults_and_overrides() {
        let actor = AuthPolicy::services()
            .actor_from_headers(&headers(&[("authorization", "Bearer  svc-a ")]), "req-1")
            .unwrap();
        assert_eq!(actor.subject, "svc-a");
        assert_eq!(actor.role, Role::Service);
        assert_eq!(actor.request_id, "req-1");
        assert!(actor.idempotency_key.is_none());
        assert!(!actor.mfa_verified);

        let actor = AuthPolicy::users()
            .actor_from_headers(
                &headers(&[
                    ("authorization", "bearer ops"),
                    ("x-actor-role", " Migration_Operator "),
                    ("idempotency-key", "idem-1"),
                    ("x-mfa-verified", "true"),
                ]),
                "req-2",
            )
            .unwrap();
        assert_eq!(actor.role, Role::MigrationOperator);
        assert_eq!(actor.idempotency_key.as_deref(), Some("idem-1"));
        assert!(actor.mfa_verified);
    }

    #[test]
    fn test_mfa_requires_literal_true() {
        let actor = AuthPolicy::users()
            .actor_from_headers(
                &headers(&[("authorization", "Bearer u"), ("x-mfa-verified", "yes")]),
                "r",
            )
            .unwrap();
        assert!(!actor.mfa_verified);
    }

    #[tokio::test]
    async fn test_middleware_exposes_actor() {
        async fn whoami(Authenticated(actor): Authenticated) -> String {
            format!("{}:{}", actor.subject, actor.role)
        }

        let app = Router::new()
            .route("/me", get(whoami))
            .route_layer(from_fn_with_state(AuthPolicy::users(), authenticate));

        let response = app
            .clone()
            .oneshot(TestRequest::get("/me").bearer("alice").build())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body = service_spine_testing::read_body(response).await;
        assert_eq!(&body[..], b"alice:user");

        let response = app.oneshot(TestRequest::get("/me").build()).await.unwrap();
        assert_eq!(response.status(), 401);
        let body = read_json(response).await;
        assert_eq!(error_code(&body), Some("unauthorized"));
    }
}
