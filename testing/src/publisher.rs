//! Capturing event publisher.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use flashsale_core::BoxFuture;
use flashsale_core::error::PublishError;
use flashsale_core::publisher::EventPublisher;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One captured publish call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedEvent {
    /// Topic
    pub topic: String,
    /// Partition key
    pub key: String,
    /// Raw payload
    pub payload: Vec<u8>,
}

/// [`EventPublisher`] that records everything it is asked to send.
///
/// Clones share the captured list.
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventPublisher {
    published: Arc<Mutex<Vec<PublishedEvent>>>,
    failing: Arc<AtomicUsize>,
}

impl InMemoryEventPublisher {
    /// Create a publisher with nothing captured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedEvent> {
        self.published.lock().unwrap().clone()
    }

    /// Make the next `count` publishes fail.
    pub fn fail_next(&self, count: usize) {
        self.failing.store(count, Ordering::SeqCst);
    }
}

impl EventPublisher for InMemoryEventPublisher {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Result<(), PublishError>> {
        Box::pin(async move {
            let fail = self
                .failing
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(PublishError::PublishFailed {
                    topic: topic.to_string(),
                    reason: "injected failure".into(),
                });
            }
            self.published.lock().unwrap().push(PublishedEvent {
                topic: topic.to_string(),
                key: key.to_string(),
                payload: payload.to_vec(),
            });
            Ok(())
        })
    }
}
