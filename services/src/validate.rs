//! Input constraints shared by the domain handlers.
//!
//! Every failure is `invalid_input` naming the offending field.

use axum::http::Uri;
use service_spine_core::error::ServiceError;

/// Trimmed, non-empty, at most `max_bytes` long.
///
/// # Errors
///
/// `invalid_input` if the value is blank or too long.
pub fn required(field: &str, value: &str, max_bytes: usize) -> Result<String, ServiceError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ServiceError::invalid_input(format!("{field} must not be empty")));
    }
    if value.len() > max_bytes {
        return Err(ServiceError::invalid_input(format!(
            "{field} must be at most {max_bytes} bytes"
        )));
    }
    Ok(value.to_string())
}

/// Like [`required`], but a missing or blank value is `None`.
///
/// # Errors
///
/// `invalid_input` if the value is too long.
pub fn optional(field: &str, value: Option<&str>, max_bytes: usize) -> Result<Option<String>, ServiceError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => required(field, value, max_bytes).map(Some),
        None => Ok(None),
    }
}

/// [`required`], lowercased.
///
/// # Errors
///
/// `invalid_input` if the value is blank or too long.
pub fn name(field: &str, value: &str, max_bytes: usize) -> Result<String, ServiceError> {
    required(field, value, max_bytes).map(|value| value.to_lowercase())
}

/// Absolute `http` or `https` URL with a host.
///
/// # Errors
///
/// `invalid_input` if the value is not such a URL or is too long.
pub fn http_url(field: &str, value: &str, max_bytes: usize) -> Result<String, ServiceError> {
    let value = required(field, value, max_bytes)?;
    let uri: Uri = value
        .parse()
        .map_err(|_| ServiceError::invalid_input(format!("{field} is not a valid URL")))?;

    let scheme_ok = matches!(uri.scheme_str(), Some("http" | "https"));
    let host_ok = uri.host().is_some_and(|host| !host.is_empty());
    if !scheme_ok || !host_ok {
        return Err(ServiceError::invalid_input(format!(
            "{field} must be an absolute http(s) URL"
        )));
    }
    Ok(value)
}

/// Trim and lowercase each entry, drop duplicates keeping the first
/// occurrence, and require at least one entry.
///
/// # Errors
///
/// `invalid_input` if the list is empty, an entry is blank or too long, or
/// there are more than `max_entries` distinct entries.
pub fn distinct_names(
    field: &str,
    values: &[String],
    max_entries: usize,
    max_bytes: usize,
) -> Result<Vec<String>, ServiceError> {
    let mut distinct: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let value = name(field, value, max_bytes)?;
        if !distinct.contains(&value) {
            distinct.push(value);
        }
    }
    if distinct.is_empty() {
        return Err(ServiceError::invalid_input(format!("{field} must not be empty")));
    }
    if distinct.len() > max_entries {
        return Err(ServiceError::invalid_input(format!(
            "{field} must have at most {max_entries} entries"
        )));
    }
    Ok(distinct)
}
