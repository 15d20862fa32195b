//! Custom Axum extractors.
//!
//! Each one rejects with an [`AppError`] so that malformed input is reported
//! in the canonical error envelope instead of axum's plain-text rejections:
//!
//! - [`JsonBody`]: JSON request body, `400 invalid_input` when malformed or
//!   over the route's body limit
//! - [`QueryParams`]: query string
//! - [`PathParam`]: path segments
//! - [`RequestId`]: request id assigned by the pipeline
//!
//! # Examples
//!
//! ```ignore
//! async fn handler(
//!     Authenticated(actor): Authenticated,
//!     PathParam(key): PathParam<String>,
//!     JsonBody(body): JsonBody<PutRequest>,
//! ) -> Result<Replayable, AppError> {
//!     ...
//! }
//! ```

use crate::error::AppError;
use crate::middleware::{RequestId, synthesize_request_id};
use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::request::Parts,
};
use serde::de::DeserializeOwned;

/// JSON request body.
///
/// The content type is not checked; the body must parse as `T`.
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| AppError::invalid_input(rejection.body_text()))?;

        serde_json::from_slice(&bytes)
            .map(Self)
            .map_err(|err| AppError::invalid_input(format!("invalid JSON body: {err}")))
    }
}

/// Query string parameters.
#[derive(Debug, Clone)]
pub struct QueryParams<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| Self(value))
            .map_err(|rejection| AppError::invalid_input(rejection.body_text()))
    }
}

/// Path parameters.
#[derive(Debug, Clone)]
pub struct PathParam<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for PathParam<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Path::<T>::from_request_parts(parts, state)
            .await
            .map(|Path(value)| Self(value))
            .map_err(|rejection| AppError::invalid_input(rejection.body_text()))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Self>()
            .cloned()
            .unwrap_or_else(|| Self(synthesize_request_id())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{Router, extract::DefaultBodyLimit, routing::post};
    use serde::Deserialize;
    use service_spine_testing::{TestRequest, error_code, read_json};
    use tower::ServiceExt;

    #[derive(Debug, Deserialize)]
    struct Body {
        name: String,
    }

    async fn echo(JsonBody(body): JsonBody<Body>) -> String {
        body.name
    }

    fn app() -> Router {
        Router::new()
            .route("/echo", post(echo))
            .layer(DefaultBodyLimit::max(16))
    }

    #[tokio::test]
    async fn test_json_body_parses() {
        let response = app()
            .oneshot(TestRequest::post("/echo").json(&serde_json::json!({"name": "a"})).build())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_malformed_json_is_invalid_input() {
        let response = app()
            .oneshot(TestRequest::post("/echo").raw("{not json").build())
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body = read_json(response).await;
        assert_eq!(error_code(&body), Some("invalid_input"));
    }

    #[tokio::test]
    async fn test_oversized_body_is_invalid_input() {
        let response = app()
            .oneshot(
                TestRequest::post("/echo")
                    .json(&serde_json::json!({"name": "far too long for the limit"}))
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body = read_json(response).await;
        assert_eq!(error_code(&body), Some("invalid_input"));
    }
}
