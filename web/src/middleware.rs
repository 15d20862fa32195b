//! Request pipeline middleware.
//!
//! Layers, outermost first:
//!
//! 1. **Request id**: read `X-Request-Id` (or synthesize `req-<UTC nanos>`),
//!    store it in the request extensions, run the request inside an
//!    `http_request` span, echo the id on the response, and stamp it into
//!    error envelopes.
//! 2. **Metrics**: time the request and record `http_requests_total` and
//!    `http_request_duration_seconds` once the final status is known.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use service_spine_web::middleware::{request_id_layer, track_metrics};
//!
//! let app = Router::new()
//!     .route("/v1/stats", get(stats))
//!     .layer(axum::middleware::from_fn_with_state(http_metrics, track_metrics))
//!     .layer(request_id_layer());
//! ```

use crate::envelope::error_response;
use crate::error::{AppError, ErrorDetail};
use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use service_spine_runtime::HttpMetrics;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::Instrument;

/// Metric path label for requests that matched no route.
pub const UNMATCHED_PATH: &str = "unmatched";

/// Header name for the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request id of the current request.
///
/// Inserted into the request extensions by [`RequestIdLayer`]; handlers take
/// it as an extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `req-<UTC nanoseconds since the epoch>`.
#[must_use]
pub fn synthesize_request_id() -> String {
    format!("req-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

/// Create the request-id layer.
#[must_use]
pub const fn request_id_layer() -> RequestIdLayer {
    RequestIdLayer
}

/// Layer for request id tracking.
#[derive(Clone, Debug)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdMiddleware { inner }
    }
}

/// Middleware service for request id tracking.
#[derive(Clone, Debug)]
pub struct RequestIdMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for RequestIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(synthesize_request_id, str::to_string);

        req.extensions_mut().insert(RequestId(request_id.clone()));

        let span = tracing::info_span!(
            "http_request",
            request_id = %request_id,
            method = %req.method(),
            uri = %req.uri(),
        );

        let fut = self.inner.call(req);

        Box::pin(async move {
            let response = fut.instrument(span).await?;
            Ok(finalize(response, &request_id))
        })
    }
}

/// Stamp the request id into error envelopes and the response header.
fn finalize(response: Response, request_id: &str) -> Response {
    let detail = response.extensions().get::<ErrorDetail>().cloned();
    let mut response = match detail {
        Some(detail) => rerender(response, &detail, request_id),
        None if response.status() == StatusCode::METHOD_NOT_ALLOWED => {
            rerender(response, &AppError::method_not_allowed().detail(), request_id)
        }
        None => response,
    };

    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn rerender(response: Response, detail: &ErrorDetail, request_id: &str) -> Response {
    let (mut parts, _) = response.into_parts();
    let (rendered, body) = error_response(detail.kind, &detail.message, Some(request_id)).into_parts();

    parts.status = rendered.status;
    parts.headers.remove(header::CONTENT_LENGTH);
    if let Some(content_type) = rendered.headers.get(header::CONTENT_TYPE) {
        parts.headers.insert(header::CONTENT_TYPE, content_type.clone());
    }
    parts.extensions.insert(detail.clone());
    Response::from_parts(parts, body)
}

/// Record request count and latency.
///
/// The `path` label is the matched route template (`/v1/cache/:key`) when a
/// route matched, otherwise [`UNMATCHED_PATH`].
pub async fn track_metrics(
    State(metrics): State<HttpMetrics>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().as_str().to_owned();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| UNMATCHED_PATH.to_owned(), |matched| matched.as_str().to_owned());

    let response = next.run(req).await;

    metrics.record_request(&method, &path, response.status().as_u16(), start.elapsed());
    response
}

/// Fallback for unknown paths.
pub async fn not_found(req: Request<Body>) -> Response {
    AppError::not_found(format!("no route for {}", req.uri().path())).into_response()
}
