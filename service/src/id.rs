//! Snowflake order ids.
//!
//! ```text
//!  63        22 21      12 11        0
//! ┌────────────┬──────────┬───────────┐
//! │ ms since   │ node id  │ sequence  │
//! │ 2024-01-01 │ 10 bits  │ 12 bits   │
//! └────────────┴──────────┴───────────┘
//! ```
//!
//! Ids from one generator strictly increase. Distinct node ids never collide,
//! so every process placing orders against the same store needs its own
//! `NODE_ID`.

use crate::config::{ConfigError, MAX_NODE_ID};
use flashsale_core::environment::{Clock, OrderIdGenerator};
use flashsale_core::types::OrderId;
use std::sync::{Arc, Mutex, PoisonError};

/// 2024-01-01T00:00:00Z in Unix milliseconds.
pub const EPOCH_MS: i64 = 1_704_067_200_000;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug, Default)]
struct Cursor {
    last_ms: u64,
    sequence: u64,
}

/// Time-ordered [`OrderIdGenerator`].
pub struct SnowflakeIdGenerator {
    node_id: u64,
    clock: Arc<dyn Clock>,
    cursor: Mutex<Cursor>,
}

impl SnowflakeIdGenerator {
    /// Generator for `node_id` reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `node_id` exceeds 1023.
    pub fn new(node_id: u16, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        if node_id > MAX_NODE_ID {
            return Err(ConfigError::Invalid {
                name: "NODE_ID",
                reason: format!("{node_id} exceeds {MAX_NODE_ID}"),
            });
        }
        Ok(Self {
            node_id: u64::from(node_id),
            clock,
            cursor: Mutex::new(Cursor::default()),
        })
    }

    /// Split an id into (milliseconds since epoch, node id, sequence).
    #[must_use]
    pub const fn decompose(id: OrderId) -> (u64, u64, u64) {
        let raw = id.get();
        (
            raw >> (NODE_BITS + SEQUENCE_BITS),
            (raw >> SEQUENCE_BITS) & ((1 << NODE_BITS) - 1),
            raw & MAX_SEQUENCE,
        )
    }

    fn elapsed_ms(&self) -> u64 {
        let ms = self.clock.now().timestamp_millis() - EPOCH_MS;
        u64::try_from(ms).unwrap_or(0)
    }
}

impl OrderIdGenerator for SnowflakeIdGenerator {
    fn next_id(&self) -> OrderId {
        let now_ms = self.elapsed_ms();
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);

        // A clock that steps back keeps issuing from the last timestamp
        if now_ms > cursor.last_ms {
            cursor.last_ms = now_ms;
            cursor.sequence = 0;
        } else if cursor.sequence == MAX_SEQUENCE {
            cursor.last_ms += 1;
            cursor.sequence = 0;
        } else {
            cursor.sequence += 1;
        }

        OrderId::new(
            (cursor.last_ms << (NODE_BITS + SEQUENCE_BITS))
                | (self.node_id << SEQUENCE_BITS)
                | cursor.sequence,
        )
    }
}

impl std::fmt::Debug for SnowflakeIdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakeIdGenerator")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use flashsale_testing::{ManualClock, test_clock};

    #[test]
    fn layout_carries_time_node_and_sequence() {
        let clock = ManualClock::new(test_clock().now());
        let ids = SnowflakeIdGenerator::new(7, Arc::new(clock.clone())).unwrap();

        let first = ids.next_id();
        let second = ids.next_id();
        let expected_ms = u64::try_from(test_clock().now().timestamp_millis() - EPOCH_MS).unwrap();

        assert_eq!(SnowflakeIdGenerator::decompose(first), (expected_ms, 7, 0));
        assert_eq!(SnowflakeIdGenerator::decompose(second), (expected_ms, 7, 1));

        clock.advance(Duration::milliseconds(1));
        assert_eq!(SnowflakeIdGenerator::decompose(ids.next_id()), (expected_ms + 1, 7, 0));
    }

    #[test]
    fn ids_stay_monotonic_when_sequence_overflows_or_clock_steps_back() {
        let clock = ManualClock::new(test_clock().now());
        let ids = SnowflakeIdGenerator::new(1, Arc::new(clock.clone())).unwrap();

        let mut previous = ids.next_id();
        for _ in 0..5_000 {
            let next = ids.next_id();
            assert!(next > previous);
            previous = next;
        }

        clock.advance(Duration::seconds(-10));
        assert!(ids.next_id() > previous);
    }

    #[test]
    fn distinct_nodes_never_collide() {
        let clock = Arc::new(test_clock());
        let a = SnowflakeIdGenerator::new(1, clock.clone()).unwrap();
        let b = SnowflakeIdGenerator::new(2, clock).unwrap();
        assert_ne!(a.next_id(), b.next_id());
    }

    #[test]
    fn rejects_node_ids_wider_than_ten_bits() {
        assert!(SnowflakeIdGenerator::new(1024, Arc::new(test_clock())).is_err());
    }
}
