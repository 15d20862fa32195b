//! Error taxonomy shared by every service.
//!
//! Handlers surface domain errors unchanged; the web pipeline maps each
//! [`ErrorKind`] to an HTTP status and a stable machine-readable code. The
//! user-visible message is always the domain error's own text.

use crate::repository::RepositoryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Every failure a request can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Body malformed or violates a stated constraint.
    InvalidInput,
    /// `Idempotency-Key` header missing on a mutating endpoint.
    IdempotencyKeyRequired,
    /// No or empty bearer token.
    Unauthorized,
    /// Authenticated but role or MFA insufficient.
    Forbidden,
    /// Addressed entity does not exist.
    NotFound,
    /// Route exists for another method.
    MethodNotAllowed,
    /// Uniqueness violation.
    Conflict,
    /// Idempotency key reused with a different request hash.
    IdempotencyConflict,
    /// Endpoint disabled in this build.
    Gone,
    /// Repository or unexpected failure.
    #[serde(rename = "internal_error")]
    Internal,
}

impl ErrorKind {
    /// All kinds, in taxonomy order.
    pub const ALL: [Self; 10] = [
        Self::InvalidInput,
        Self::IdempotencyKeyRequired,
        Self::Unauthorized,
        Self::Forbidden,
        Self::NotFound,
        Self::MethodNotAllowed,
        Self::Conflict,
        Self::IdempotencyConflict,
        Self::Gone,
        Self::Internal,
    ];

    /// Stable error code written into the error envelope.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::IdempotencyKeyRequired => "idempotency_key_required",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::Conflict => "conflict",
            Self::IdempotencyConflict => "idempotency_conflict",
            Self::Gone => "gone",
            Self::Internal => "internal_error",
        }
    }

    /// HTTP status code for this kind.
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::InvalidInput | Self::IdempotencyKeyRequired => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::Conflict | Self::IdempotencyConflict => 409,
            Self::Gone => 410,
            Self::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A domain error: a kind from the taxonomy plus a user-facing message.
///
/// # Example
///
/// ```
/// use service_spine_core::error::{ErrorKind, ServiceError};
///
/// let err = ServiceError::invalid_input("key must not be empty");
/// assert_eq!(err.kind(), ErrorKind::InvalidInput);
/// assert_eq!(err.to_string(), "key must not be empty");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ServiceError {
    kind: ErrorKind,
    message: String,
}

impl ServiceError {
    /// Create an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The taxonomy kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The user-facing message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Input failed validation.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    /// Caller lacks the role or MFA the operation needs.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// Entity does not exist.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Uniqueness violation.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Endpoint disabled in this build.
    #[must_use]
    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Gone, message)
    }

    /// Unexpected failure.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        let kind = match &err {
            RepositoryError::Conflict(_) => ErrorKind::Conflict,
            RepositoryError::NotFound(_) => ErrorKind::NotFound,
            RepositoryError::Internal(_) => ErrorKind::Internal,
        };
        Self::new(kind, err.to_string())
    }
}
