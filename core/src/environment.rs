//! Environment traits - time and identity.
//!
//! External non-determinism (the wall clock, id generation) is injected through
//! these traits so admission logic can be tested with fixed values.

use crate::types::OrderId;
use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability.
///
/// # Examples
///
/// ```
/// use flashsale_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let before = clock.now();
/// assert!(clock.now() >= before);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Generator of durable order ids.
///
/// Ids must be unique across every process that places orders for the same
/// store. They are used as the outbox event key, so consumers deduplicate on
/// them.
pub trait OrderIdGenerator: Send + Sync {
    /// Produce the next order id.
    fn next_id(&self) -> OrderId;
}
