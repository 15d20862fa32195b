//! Error types for web handlers.
//!
//! [`AppError`] bridges domain errors and HTTP responses. Every failure is
//! rendered as the canonical error envelope:
//!
//! ```json
//! {"status":"error","error":{"code":"not_found","message":"...","request_id":"req-..."}}
//! ```
//!
//! The request id is filled in by the request-id middleware, which re-renders
//! the envelope from the [`ErrorDetail`] extension attached to the response.

use crate::envelope::error_response;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use service_spine_core::error::{ErrorKind, ServiceError};
use service_spine_core::repository::RepositoryError;
use service_spine_runtime::IdempotencyError;
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(PathParam(id): PathParam<String>) -> Result<ApiResponse<Plan>, AppError> {
///     let plan = plans.get(&id).await?;
///     Ok(ApiResponse::ok(plan))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// Taxonomy entry; decides status and code.
    kind: ErrorKind,
    /// Error message (user-facing)
    message: String,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

/// What the error envelope was rendered from.
///
/// Attached to every error response so outer layers can re-render the
/// envelope with request-scoped fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    /// Taxonomy entry.
    pub kind: ErrorKind,
    /// User-facing message.
    pub message: String,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new error with a source error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Taxonomy entry.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// User-facing message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.kind.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// 400 `invalid_input`.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    /// 400 `idempotency_key_required`.
    #[must_use]
    pub fn idempotency_key_required() -> Self {
        Self::new(
            ErrorKind::IdempotencyKeyRequired,
            "Idempotency-Key header is required",
        )
    }

    /// 401 `unauthorized`.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    /// 403 `forbidden`.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// 404 `not_found`.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// 405 `method_not_allowed`.
    #[must_use]
    pub fn method_not_allowed() -> Self {
        Self::new(ErrorKind::MethodNotAllowed, "method not allowed")
    }

    /// 409 `conflict`.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// 410 `gone`.
    #[must_use]
    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Gone, message)
    }

    /// 500 `internal_error`.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub(crate) fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            kind: self.kind,
            message: self.message.clone(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %status,
                    code = self.kind.code(),
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                );
            } else {
                tracing::error!(
                    status = %status,
                    code = self.kind.code(),
                    message = %self.message,
                    "Internal server error"
                );
            }
        }

        let mut response = error_response(self.kind, &self.message, None);
        response.extensions_mut().insert(self.detail());
        response
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        Self::new(err.kind(), err.message())
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        ServiceError::from(err).into()
    }
}

impl From<IdempotencyError> for AppError {
    fn from(err: IdempotencyError) -> Self {
        match err {
            IdempotencyError::Conflict { .. } => {
                Self::new(ErrorKind::IdempotencyConflict, err.to_string())
            }
            IdempotencyError::Repository(inner) => Self::internal("idempotency store failure")
                .with_source(anyhow::Error::new(inner)),
            IdempotencyError::Hash(_) | IdempotencyError::Serialization(_) => {
                Self::internal("idempotency processing failed").with_source(anyhow::Error::new(err))
            }
        }
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}
