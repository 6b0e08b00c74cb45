//! Event publisher port used by the outbox relay.
//!
//! ```text
//! ┌──────────────┐   claim   ┌─────────────┐  publish  ┌──────────┐
//! │ outbox table │──────────►│ OutboxRelay │──────────►│ Redpanda │
//! └──────────────┘◄──mark────└─────────────┘           └──────────┘
//! ```
//!
//! Delivery is at-least-once: a row is marked published only after the broker
//! acknowledged it, so a crash in between republishes the same event.
//! Subscribers deduplicate on the message key (the order id).

use crate::error::PublishError;
use futures::future::BoxFuture;

/// Publishes serialized events to a topic-based transport.
///
/// # Dyn Compatibility
///
/// Returns `Pin<Box<dyn Future>>` so the relay can hold `Arc<dyn EventPublisher>`.
pub trait EventPublisher: Send + Sync {
    /// Publish one payload to `topic`, partitioned by `key`.
    ///
    /// Resolves once the transport acknowledged the write.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] if the transport rejects the message or does
    /// not acknowledge it in time.
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Result<(), PublishError>>;
}
