//! # Flashsale Testing
//!
//! In-memory collaborators for testing flash-sale admission without Redis,
//! Postgres or Redpanda.
//!
//! This crate provides:
//! - Deterministic clocks and id generators
//! - [`InMemoryStockLedger`]: ledger with call counters and fault injection
//! - [`InMemoryFlashsaleStore`]: repository, transactional outbox and relay
//!   store over one shared state, with fail points
//! - [`InMemoryEventPublisher`]: captures relayed events
//! - [`MockRiskEvaluator`]: fixed verdicts or an unavailable service
//!
//! ## Example
//!
//! ```ignore
//! let ledger = InMemoryStockLedger::new();
//! let store = InMemoryFlashsaleStore::new();
//! let orchestrator = OrderAdmissionOrchestrator::new(
//!     Arc::new(ledger.clone()),
//!     Arc::new(store.clone()),
//!     Arc::new(store.clone()),
//!     Arc::new(MockRiskEvaluator::allow()),
//!     Arc::new(test_clock()),
//!     Arc::new(SequentialIdGenerator::new(1)),
//!     AdmissionConfig::default(),
//! );
//! ```

use chrono::{DateTime, Utc};
use flashsale_core::environment::Clock;

mod ledger;
mod publisher;
mod risk;
mod store;

pub use ledger::InMemoryStockLedger;
pub use publisher::{InMemoryEventPublisher, PublishedEvent};
pub use risk::MockRiskEvaluator;
pub use store::{FailPoint, InMemoryFlashsaleStore, OutboxRowStatus};

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use flashsale_core::environment::OrderIdGenerator;
    use flashsale_core::types::OrderId;
    use std::sync::atomic::{AtomicU64, Ordering};
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
    /// another to the code under test.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Jump to `time`.
        #[allow(clippy::unwrap_used)]
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap() = time;
        }

        /// Move forward by `delta`.
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, delta: chrono::Duration) {
            let mut time = self.time.lock().unwrap();
            *time += delta;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Predictable order ids: `start`, `start + 1`, ...
    #[derive(Debug)]
    pub struct SequentialIdGenerator {
        next: AtomicU64,
    }

    impl SequentialIdGenerator {
        /// First id handed out is `start`.
        #[must_use]
        pub const fn new(start: u64) -> Self {
            Self {
                next: AtomicU64::new(start),
            }
        }
    }

    impl OrderIdGenerator for SequentialIdGenerator {
        fn next_id(&self) -> OrderId {
            OrderId::new(self.next.fetch_add(1, Ordering::Relaxed))
        }
    }
}

/// Install a test-writer subscriber honoring `RUST_LOG`.
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
pub use mocks::{FixedClock, ManualClock, SequentialIdGenerator, test_clock};
