//! Canonical JSON serialization and request fingerprints.
//!
//! Idempotency conflict detection compares a digest of the *semantic* payload
//! of a request, so two retries of the same operation must hash identically
//! no matter how the client ordered its JSON keys. The canonical form is the
//! JSON Canonicalization Scheme (RFC 8785): sorted keys, no whitespace and
//! ECMAScript number formatting. Array order is significant.

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from fingerprinting a payload.
#[derive(Error, Debug)]
pub enum HashError {
    /// The payload could not be canonicalized.
    #[error("payload is not representable as canonical JSON: {0}")]
    Canonicalization(String),
}

/// Canonical JSON bytes for any serializable value.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use service_spine_core::hashing::canonical_json;
///
/// let value = json!({"b": 1.0, "a": [true, null, "x"]});
/// assert_eq!(canonical_json(&value).unwrap(), br#"{"a":[true,null,"x"],"b":1}"#);
/// ```
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Lowercase hex SHA-256 of the canonical form of any serializable payload.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] if the payload cannot be
/// represented as JSON (e.g. a map with non-string keys).
pub fn fingerprint<T: Serialize + ?Sized>(payload: &T) -> Result<String, HashError> {
    let bytes = canonical_json(payload)?;
    Ok(digest_hex(&bytes))
}

/// Lowercase hex SHA-256 of raw bytes.
#[must_use]
pub fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
