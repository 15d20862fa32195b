//! Prometheus scrape endpoint.

use crate::state::HostState;
use axum::{
    extract::State,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// `GET /metrics`.
///
/// Returns `# no metrics yet\n` until the first request has been recorded.
#[allow(clippy::unused_async)]
pub async fn metrics(State(state): State<HostState>) -> Response {
    let body = state.metrics().registry().render_prometheus();
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE))],
        body,
    )
        .into_response()
}
