//! # Flashsale Testing
//!
//! Testing utilities for the flash-sale order pipeline.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - [`InMemoryCoordinationStore`]: Redis stand-in with TTLs and script emulation
//! - [`InMemoryShopRepository`] and [`InMemoryVoucherStore`]: backing-store stand-ins
//!   with load counters, injected latency and injected failures
//!
//! ## Example
//!
//! ```
//! use flashsale_testing::{InMemoryCoordinationStore, test_clock};
//! use flashsale_core::coordination::CoordinationStore;
//! use flashsale_core::environment::Clock;
//!
//! # async fn example() -> flashsale_core::Result<()> {
//! let store = InMemoryCoordinationStore::new();
//! store.set("seckill:stock:1", "10", None).await?;
//! assert_eq!(store.get("seckill:stock:1").await?.as_deref(), Some("10"));
//!
//! let clock = test_clock();
//! assert_eq!(clock.now(), clock.now());
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use flashsale_core::environment::Clock;

pub mod coordination_mocks;
pub mod repository_mocks;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use flashsale_testing::mocks::FixedClock;
    /// use flashsale_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
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
    /// Clones share the same time, so a test can hand one clone to the code
    /// under test and advance the other.
    ///
    /// ```
    /// use flashsale_testing::mocks::ManualClock;
    /// use flashsale_core::environment::Clock;
    ///
    /// let clock = ManualClock::new(chrono::Utc::now());
    /// let start = clock.now();
    /// clock.advance(chrono::Duration::seconds(30));
    /// assert_eq!(clock.now() - start, chrono::Duration::seconds(30));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move time forward
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }

        /// Jump to an absolute time
        #[allow(clippy::unwrap_used)]
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap() = to;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_time())
    }

    /// The instant [`test_clock`] is pinned to.
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is a literal.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use coordination_mocks::InMemoryCoordinationStore;
pub use mocks::{FixedClock, ManualClock, test_clock, test_time};
pub use repository_mocks::{InMemoryShopRepository, InMemoryVoucherStore};
