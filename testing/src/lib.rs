//! # Service Spine Testing
//!
//! Testing utilities and helpers for services built on the Service Spine host.
//!
//! This crate provides:
//! - Mock implementations of the environment traits (clocks, id generators)
//! - Request builders and response readers for driving a router in-process
//! - proptest strategies shared by several crates
//!
//! ## Example
//!
//! ```ignore
//! use service_spine_testing::{read_json, TestRequest};
//! use tower::ServiceExt;
//!
//! #[tokio::test]
//! async fn test_put_requires_auth() {
//!     let app = build_app();
//!     let response = app
//!         .oneshot(TestRequest::post("/v1/cache/demo").json(&body).build())
//!         .await
//!         .unwrap();
//!     assert_eq!(response.status(), 401);
//! }
//! ```

use chrono::{DateTime, Utc};
use service_spine_core::environment::{Clock, IdGenerator};

pub mod requests;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, IdGenerator, Utc};
    use service_spine_core::environment::{format_id, sanitize_prefix};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use service_spine_testing::mocks::FixedClock;
    /// use service_spine_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hold one handle and give
    /// another to the service under test.
    ///
    /// ```
    /// use chrono::Duration;
    /// use service_spine_core::environment::Clock;
    /// use service_spine_testing::mocks::MockClock;
    ///
    /// let clock = MockClock::default();
    /// let start = clock.now();
    /// clock.advance(Duration::seconds(61));
    /// assert_eq!(clock.now() - start, Duration::seconds(61));
    /// ```
    #[derive(Debug, Clone)]
    pub struct MockClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl MockClock {
        /// Start at the given time.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward (or backward, for a negative duration).
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self::new(test_time())
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Id generator counting up from 1, one counter for all prefixes.
    ///
    /// ```
    /// use service_spine_core::environment::IdGenerator;
    /// use service_spine_testing::mocks::SequentialIdGenerator;
    ///
    /// let ids = SequentialIdGenerator::new();
    /// assert_eq!(ids.next_id("whk"), "whk_00000000000000000001");
    /// assert_eq!(ids.next_id("obx"), "obx_00000000000000000002");
    /// ```
    #[derive(Debug, Default)]
    pub struct SequentialIdGenerator {
        next: AtomicU64,
    }

    impl SequentialIdGenerator {
        /// Start at 1.
        #[must_use]
        pub const fn new() -> Self {
            Self {
                next: AtomicU64::new(0),
            }
        }
    }

    impl IdGenerator for SequentialIdGenerator {
        fn next_id(&self, prefix: &str) -> String {
            let value = self.next.fetch_add(1, Ordering::Relaxed) + 1;
            format_id(&sanitize_prefix(prefix), value)
        }
    }

    /// 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn test_time() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_time())
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Metric or label names: lowercase snake case.
    pub fn arb_name() -> impl Strategy<Value = String> {
        "[a-z][a-z_]{0,11}"
    }

    /// A small label set, possibly with characters that need escaping.
    pub fn arb_labels() -> impl Strategy<Value = Vec<(String, String)>> {
        prop::collection::btree_map(arb_name(), "[a-zA-Z0-9/\"\\\\ ]{0,10}", 0..4)
            .prop_map(|labels| labels.into_iter().collect())
    }

    /// Non-negative observations such as request durations.
    pub fn arb_observations() -> impl Strategy<Value = Vec<f64>> {
        prop::collection::vec(0.0f64..10.0, 0..64)
    }
}

/// Install a test-friendly tracing subscriber once. Later calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .try_init();
}

// Re-export commonly used items
pub use requests::{TestRequest, error_code, is_envelope, read_body, read_json};
pub use mocks::{FixedClock, MockClock, SequentialIdGenerator, test_clock, test_time};
