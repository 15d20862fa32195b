//! Request builders and response readers for in-process router tests.

use axum::body::{Body, Bytes, to_bytes};
use axum::response::Response;
use http::{Method, Request, header};
use serde::Serialize;
use serde_json::Value;

/// Builder for requests carrying the pipeline's headers.
///
/// ```
/// use service_spine_testing::TestRequest;
///
/// let request = TestRequest::post("/v1/cache/demo:key")
///     .bearer("svc-a")
///     .role("service")
///     .idempotency_key("idem-1")
///     .json(&serde_json::json!({"value": "eyJrIjoidiJ9", "ttl_seconds": 60}))
///     .build();
/// assert_eq!(request.headers()["idempotency-key"], "idem-1");
/// ```
#[derive(Debug, Clone)]
pub struct TestRequest {
    method: Method,
    uri: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl TestRequest {
    /// Request with an arbitrary method.
    #[must_use]
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// GET request.
    #[must_use]
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    /// POST request.
    #[must_use]
    pub fn post(uri: impl Into<String>) -> Self {
        Self::new(Method::POST, uri)
    }

    /// PUT request.
    #[must_use]
    pub fn put(uri: impl Into<String>) -> Self {
        Self::new(Method::PUT, uri)
    }

    /// DELETE request.
    #[must_use]
    pub fn delete(uri: impl Into<String>) -> Self {
        Self::new(Method::DELETE, uri)
    }

    /// Add any header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// `Authorization: Bearer <subject>`.
    #[must_use]
    pub fn bearer(self, subject: &str) -> Self {
        self.header(header::AUTHORIZATION.as_str(), format!("Bearer {subject}"))
    }

    /// `X-Actor-Role`.
    #[must_use]
    pub fn role(self, role: &str) -> Self {
        self.header("x-actor-role", role)
    }

    /// `Idempotency-Key`.
    #[must_use]
    pub fn idempotency_key(self, key: &str) -> Self {
        self.header("idempotency-key", key)
    }

    /// `X-MFA-Verified: true`.
    #[must_use]
    pub fn mfa(self) -> Self {
        self.header("x-mfa-verified", "true")
    }

    /// `X-Request-Id`.
    #[must_use]
    pub fn request_id(self, id: &str) -> Self {
        self.header("x-request-id", id)
    }

    /// JSON body with a matching content type.
    #[must_use]
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        self.body = serde_json::to_vec(body).unwrap_or_default();
        self.header(header::CONTENT_TYPE.as_str(), "application/json")
    }

    /// Raw body bytes.
    #[must_use]
    pub fn raw(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Build the request. Invalid header values are skipped.
    #[must_use]
    pub fn build(self) -> Request<Body> {
        let mut request = Request::new(Body::from(self.body));
        *request.method_mut() = self.method;
        if let Ok(uri) = self.uri.parse() {
            *request.uri_mut() = uri;
        }
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                header::HeaderName::from_bytes(name.as_bytes()),
                header::HeaderValue::from_str(&value),
            ) {
                request.headers_mut().append(name, value);
            }
        }
        request
    }
}

/// Collect a response body. A body that fails to read yields empty bytes.
pub async fn read_body(response: Response) -> Bytes {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap_or_default()
}

/// Collect a response body as JSON. Non-JSON bodies yield `Value::Null`.
pub async fn read_json(response: Response) -> Value {
    serde_json::from_slice(&read_body(response).await).unwrap_or(Value::Null)
}

/// Error code of an error envelope, if the value is one.
#[must_use]
pub fn error_code(envelope: &Value) -> Option<&str> {
    if envelope.get("status")?.as_str()? != "error" {
        return None;
    }
    envelope.get("error")?.get("code")?.as_str()
}

/// Whether the value has the shape of a success or error envelope.
#[must_use]
pub fn is_envelope(value: &Value) -> bool {
    match value.get("status").and_then(Value::as_str) {
        Some("success") => value.get("data").is_some(),
        Some("error") => value
            .get("error")
            .is_some_and(|error| error.get("code").is_some() && error.get("message").is_some()),
        _ => false,
    }
}
