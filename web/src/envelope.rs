//! Success and error envelopes.
//!
//! Success: `{"status":"success","message":<optional>,"data":<payload>}`.
//! Error: `{"status":"error","error":{"code","message","request_id"}}`.
//! Both are written as `application/json; charset=utf-8`.

use crate::error::AppError;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::value::RawValue;
use service_spine_core::error::ErrorKind;
use service_spine_runtime::StoredResponse;

/// Content type of every JSON response.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Set on responses replayed from an idempotency record.
pub const REPLAYED_HEADER: &str = "idempotent-replayed";

#[derive(Serialize)]
struct SuccessEnvelope<'a, T: ?Sized> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    data: &'a T,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    status: &'static str,
    error: ErrorBody<'a>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
        body,
    )
        .into_response()
}

fn render_success<T: Serialize + ?Sized>(
    status: StatusCode,
    message: Option<&str>,
    data: &T,
) -> Response {
    let envelope = SuccessEnvelope {
        status: "success",
        message,
        data,
    };
    match serde_json::to_vec(&envelope) {
        Ok(body) => json_response(status, body),
        Err(err) => AppError::internal("response could not be serialized")
            .with_source(err.into())
            .into_response(),
    }
}

/// Render an error envelope.
#[must_use]
pub fn error_response(kind: ErrorKind, message: &str, request_id: Option<&str>) -> Response {
    let envelope = ErrorEnvelope {
        status: "error",
        error: ErrorBody {
            code: kind.code(),
            message,
            request_id,
        },
    };
    let status = StatusCode::from_u16(kind.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, serde_json::to_vec(&envelope).unwrap_or_default())
}

/// Success envelope around a serializable payload.
///
/// ```ignore
/// async fn get_plan(...) -> Result<ApiResponse<Plan>, AppError> {
///     Ok(ApiResponse::ok(plan))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    status: StatusCode,
    message: Option<String>,
    data: T,
}

impl<T> ApiResponse<T> {
    /// `200 OK`.
    pub const fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            message: None,
            data,
        }
    }

    /// `201 Created`.
    pub const fn created(data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            message: None,
            data,
        }
    }

    /// `202 Accepted`.
    pub const fn accepted(data: T) -> Self {
        Self {
            status: StatusCode::ACCEPTED,
            message: None,
            data,
        }
    }

    /// Attach the optional `message` field.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        render_success(self.status, self.message.as_deref(), &self.data)
    }
}

/// Success envelope around a response produced by the idempotency engine.
///
/// Fresh and replayed responses embed the same stored bytes as `data`, so a
/// replay is byte-identical to the original. Replays also carry
/// `Idempotent-Replayed: true`.
#[derive(Debug, Clone)]
pub struct Replayable(pub StoredResponse);

impl IntoResponse for Replayable {
    fn into_response(self) -> Response {
        let StoredResponse {
            status,
            body,
            replayed,
        } = self.0;
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);

        let data = match String::from_utf8(body)
            .map_err(anyhow::Error::from)
            .and_then(|text| RawValue::from_string(text).map_err(anyhow::Error::from))
        {
            Ok(data) => data,
            Err(err) => {
                return AppError::internal("stored response is not valid JSON")
                    .with_source(err)
                    .into_response();
            }
        };

        let mut response = render_success(status, None, &*data);
        if replayed {
            response
                .headers_mut()
                .insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
        }
        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use service_spine_testing::{is_envelope, read_body, read_json};

    #[tokio::test]
    async fn test_success_envelope_shape() {
        let response = ApiResponse::created(json!({"key": "demo"})).into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], JSON_CONTENT_TYPE);

        let body = read_json(response).await;
        assert!(is_envelope(&body));
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["key"], "demo");
        assert!(body.get("message").is_none());
    }

    #[tokio::test]
    async fn test_message_is_optional() {
        let response = ApiResponse::ok(json!(null)).with_message("deleted").into_response();
        let body = read_json(response).await;
        assert_eq!(body["message"], "deleted");
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn test_replay_is_byte_identical_and_flagged() {
        let stored = |replayed| StoredResponse {
            status: 201,
            body: br#"{"key":"demo","ttl_seconds":60}"#.to_vec(),
            replayed,
        };
        let fresh = Replayable(stored(false)).into_response();
        let replay = Replayable(stored(true)).into_response();

        assert!(fresh.headers().get(REPLAYED_HEADER).is_none());
        assert_eq!(replay.headers()[REPLAYED_HEADER], "true");
        assert_eq!(replay.status(), StatusCode::CREATED);
        assert_eq!(read_body(fresh).await, read_body(replay).await);
    }

    #[tokio::test]
    async fn test_error_envelope_with_request_id() {
        let response = error_response(ErrorKind::Gone, "rollback is disabled", Some("req-1"));
        assert_eq!(response.status(), StatusCode::GONE);
        let body = read_json(response).await;
        assert_eq!(
            body,
            json!({
                "status": "error",
                "error": {"code": "gone", "message": "rollback is disabled", "request_id": "req-1"}
            })
        );
    }
}
