//! The authenticated caller of a request.
//!
//! An [`Actor`] is built once per request by the pipeline's auth stage and is
//! immutable afterwards. It is never persisted.

use crate::error::{ErrorKind, ServiceError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Caller role, parsed from the `X-Actor-Role` header.
///
/// Role strings are trimmed and lowercased. Unrecognized values are kept
/// verbatim in [`Role::Other`] so that handlers can still reject them with a
/// precise message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    /// End user of a user-facing API.
    User,
    /// Another service calling a service API.
    Service,
    /// Administrator.
    Admin,
    /// Operations administrator.
    OpsAdmin,
    /// Operator allowed to plan and run data migrations.
    MigrationOperator,
    /// Support staff.
    Support,
    /// Any other role string.
    Other(String),
}

impl Role {
    /// Parse a role string (case-insensitive, surrounding whitespace ignored).
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "user" => Self::User,
            "service" => Self::Service,
            "admin" => Self::Admin,
            "ops_admin" => Self::OpsAdmin,
            "migration_operator" => Self::MigrationOperator,
            "support" => Self::Support,
            _ => Self::Other(normalized),
        }
    }

    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::User => "user",
            Self::Service => "service",
            Self::Admin => "admin",
            Self::OpsAdmin => "ops_admin",
            Self::MigrationOperator => "migration_operator",
            Self::Support => "support",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// The caller context of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Bearer subject, trimmed and non-empty.
    pub subject: String,
    /// Caller role.
    pub role: Role,
    /// Request id assigned by the pipeline.
    pub request_id: String,
    /// Value of the `Idempotency-Key` header, if any.
    pub idempotency_key: Option<String>,
    /// Whether the caller passed multi-factor verification.
    pub mfa_verified: bool,
}

impl Actor {
    /// Build an actor with no idempotency key and MFA unverified.
    #[must_use]
    pub fn new(subject: impl Into<String>, role: Role, request_id: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            role,
            request_id: request_id.into(),
            idempotency_key: None,
            mfa_verified: false,
        }
    }

    /// Attach an idempotency key. Blank keys are treated as absent.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        self
    }

    /// Set the MFA flag.
    #[must_use]
    pub const fn with_mfa(mut self, verified: bool) -> Self {
        self.mfa_verified = verified;
        self
    }

    /// Whether the actor holds one of the given roles.
    #[must_use]
    pub fn has_any_role(&self, allowed: &[Role]) -> bool {
        allowed.contains(&self.role)
    }

    /// Fail with `forbidden` unless the actor holds one of the given roles.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Forbidden`] error naming the actor's role.
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), ServiceError> {
        if self.has_any_role(allowed) {
            Ok(())
        } else {
            Err(ServiceError::forbidden(format!(
                "role {} is not permitted for this operation",
                self.role
            )))
        }
    }

    /// Fail with `forbidden` unless the actor passed MFA.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Forbidden`] error when MFA is not verified.
    pub fn require_mfa(&self) -> Result<(), ServiceError> {
        if self.mfa_verified {
            Ok(())
        } else {
            Err(ServiceError::forbidden("mfa verification required"))
        }
    }

    /// The idempotency key, required on state-changing endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IdempotencyKeyRequired`] when the header was absent.
    pub fn require_idempotency_key(&self) -> Result<&str, ServiceError> {
        self.idempotency_key.as_deref().ok_or_else(|| {
            ServiceError::new(
                ErrorKind::IdempotencyKeyRequired,
                "Idempotency-Key header is required",
            )
        })
    }
}
