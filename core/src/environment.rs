//! Environment module - injectable dependencies.
//!
//! Everything a handler needs from the outside world that would make a test
//! non-deterministic (wall-clock time, identifier generation) is abstracted
//! behind a trait here and injected into the service at construction time.
//!
//! Test implementations (`FixedClock`, `MockClock`, `SequentialIdGenerator`)
//! live in `service-spine-testing`.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```
/// use service_spine_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let before = clock.now();
/// assert!(clock.now() >= before);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system's UTC time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Identifier generation for records created by handlers.
///
/// Identifiers must be URL-safe (they appear in paths) and strictly
/// increasing per generator so that listings sorted by id follow creation order.
pub trait IdGenerator: Send + Sync {
    /// Produce the next identifier for records of the given prefix.
    fn next_id(&self, prefix: &str) -> String;
}

/// Width of the zero-padded numeric part of generated identifiers.
///
/// `u64::MAX` has 20 decimal digits, so every value fits and ids sort
/// lexicographically in generation order.
const ID_DIGITS: usize = 20;

/// Monotonic identifier generator seeded from the UTC nanosecond clock.
///
/// Each id has the shape `<prefix>_<20 digits>`. The numeric part is the
/// larger of "now in nanoseconds" and "previous value + 1", so ids never
/// repeat or go backwards even when the system clock does, and concurrent
/// callers never observe the same value.
///
/// # Example
///
/// ```
/// use service_spine_core::environment::{IdGenerator, MonotonicIdGenerator};
///
/// let ids = MonotonicIdGenerator::new();
/// let first = ids.next_id("whk");
/// let second = ids.next_id("whk");
/// assert!(first.starts_with("whk_"));
/// assert!(second > first);
/// ```
#[derive(Debug, Default)]
pub struct MonotonicIdGenerator {
    last: AtomicU64,
}

impl MonotonicIdGenerator {
    /// Create a new generator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    fn next_value(&self) -> u64 {
        let now = Utc::now()
            .timestamp_nanos_opt()
            .and_then(|nanos| u64::try_from(nanos).ok())
            .unwrap_or_default();

        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(current.saturating_add(1));
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }
}

impl IdGenerator for MonotonicIdGenerator {
    fn next_id(&self, prefix: &str) -> String {
        format_id(&sanitize_prefix(prefix), self.next_value())
    }
}

/// Format an identifier from a prefix and a numeric value.
///
/// Shared with the sequential test generator so both produce the same shape.
#[must_use]
pub fn format_id(prefix: &str, value: u64) -> String {
    format!("{prefix}_{value:0width$}", width = ID_DIGITS)
}

/// Lowercase the prefix and drop anything that is not `[a-z0-9]`.
///
/// An empty result falls back to `id`.
#[must_use]
pub fn sanitize_prefix(prefix: &str) -> String {
    let cleaned: String = prefix
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if cleaned.is_empty() {
        "id".to_string()
    } else {
        cleaned
    }
}
