//! Outbox relay: delivers committed order events to the broker.
//!
//! Each round claims a batch of pending rows, publishes them one by one keyed
//! by order id, then marks the delivered rows published. A failed publish is
//! recorded on its row and retried in a later round; rows that keep failing
//! are parked by the store once they reach `max_attempts`.
//!
//! Delivery is at-least-once. A crash between publish and `mark_published`
//! republishes the row, and consumers deduplicate on the key.

use crate::config::RelayConfig;
use crate::metrics::{OUTBOX_RELAY_ERRORS, OUTBOX_RELAYED};
use flashsale_core::error::StoreError;
use flashsale_core::outbox::OutboxRelayStore;
use flashsale_core::publisher::EventPublisher;
use std::sync::Arc;
use tokio::sync::watch;

/// What one relay round did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayRound {
    /// Rows claimed
    pub claimed: usize,
    /// Rows published and acknowledged
    pub published: usize,
    /// Rows whose publish failed
    pub failed: usize,
}

/// Background publisher of outbox rows.
pub struct OutboxRelay {
    store: Arc<dyn OutboxRelayStore>,
    publisher: Arc<dyn EventPublisher>,
    config: RelayConfig,
    shutdown: watch::Receiver<bool>,
}

impl OutboxRelay {
    /// Create a relay.
    ///
    /// Returns the relay and a shutdown sender. Send `true` to stop
    /// [`run`](Self::run) after the round in progress.
    #[must_use]
    pub fn new(
        store: Arc<dyn OutboxRelayStore>,
        publisher: Arc<dyn EventPublisher>,
        config: RelayConfig,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let relay = Self {
            store,
            publisher,
            config,
            shutdown: shutdown_rx,
        };
        (relay, shutdown_tx)
    }

    /// Claim, publish and settle one batch.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if claiming or settling rows fails. Publish
    /// failures are recorded on the rows, not returned.
    pub async fn relay_once(&self) -> Result<RelayRound, StoreError> {
        let records = self.store.claim_pending(self.config.batch_size).await?;
        let mut round = RelayRound {
            claimed: records.len(),
            ..RelayRound::default()
        };
        let mut delivered = Vec::with_capacity(records.len());

        for record in records {
            let message = &record.message;
            match self
                .publisher
                .publish(&message.topic, &message.key, &message.payload)
                .await
            {
                Ok(()) => delivered.push(record.id),
                Err(error) => {
                    round.failed += 1;
                    metrics::counter!(OUTBOX_RELAY_ERRORS).increment(1);
                    tracing::warn!(
                        outbox_id = record.id,
                        topic = %message.topic,
                        key = %message.key,
                        attempts = record.attempts + 1,
                        error = %error,
                        "Outbox publish failed"
                    );
                    self.store
                        .mark_failed(record.id, error.to_string(), self.config.max_attempts)
                        .await?;
                },
            }
        }

        round.published = delivered.len();
        if !delivered.is_empty() {
            self.store.mark_published(delivered).await?;
            metrics::counter!(OUTBOX_RELAYED).increment(round.published as u64);
        }
        Ok(round)
    }

    /// Relay until shutdown.
    ///
    /// Full batches are followed immediately by another round; otherwise the
    /// relay sleeps for the poll interval. Store errors are logged and the
    /// relay keeps going.
    pub async fn run(mut self) {
        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis(),
            "Outbox relay started"
        );

        while !*self.shutdown.borrow() {
            let busy = match self.relay_once().await {
                Ok(round) => {
                    if round.claimed > 0 {
                        tracing::debug!(
                            claimed = round.claimed,
                            published = round.published,
                            failed = round.failed,
                            "Outbox relay round"
                        );
                    }
                    i64::try_from(round.claimed).unwrap_or(i64::MAX) >= self.config.batch_size
                },
                Err(error) => {
                    metrics::counter!(OUTBOX_RELAY_ERRORS).increment(1);
                    tracing::error!(error = %error, "Outbox relay round failed");
                    false
                },
            };
            if busy {
                continue;
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.poll_interval) => {},
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                },
            }
        }

        tracing::info!("Outbox relay stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flashsale_core::event::OutboxMessage;
    use flashsale_core::outbox::{TransactionalOutbox, run_in_transaction};
    use flashsale_testing::{InMemoryEventPublisher, InMemoryFlashsaleStore, OutboxRowStatus};
    use std::time::Duration;

    async fn stage(store: &InMemoryFlashsaleStore, key: &str) {
        let message = OutboxMessage {
            topic: "flashsale.order.created".into(),
            key: key.into(),
            payload: format!(r#"{{"order_id":{key}}}"#).into_bytes(),
        };
        run_in_transaction(store as &dyn TransactionalOutbox, move |tx| {
            Box::pin(async move { tx.enqueue_event(&message).await })
        })
        .await
        .unwrap();
    }

    fn relay_for(
        store: &InMemoryFlashsaleStore,
        publisher: &InMemoryEventPublisher,
        max_attempts: i32,
    ) -> (OutboxRelay, watch::Sender<bool>) {
        OutboxRelay::new(
            Arc::new(store.clone()),
            Arc::new(publisher.clone()),
            RelayConfig {
                batch_size: 10,
                poll_interval: Duration::from_millis(5),
                max_attempts,
            },
        )
    }

    #[tokio::test]
    async fn publishes_in_order_and_marks_rows() {
        let store = InMemoryFlashsaleStore::new();
        let publisher = InMemoryEventPublisher::new();
        stage(&store, "11").await;
        stage(&store, "12").await;
        let (relay, _shutdown) = relay_for(&store, &publisher, 3);

        let round = relay.relay_once().await.unwrap();

        assert_eq!(round, RelayRound { claimed: 2, published: 2, failed: 0 });
        let keys: Vec<_> = publisher.published().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["11", "12"]);
        assert_eq!(store.outbox_status(1), Some((OutboxRowStatus::Published, 0)));
        assert_eq!(relay.relay_once().await.unwrap().claimed, 0);
    }

    #[tokio::test]
    async fn failed_publish_is_retried_next_round() {
        let store = InMemoryFlashsaleStore::new();
        let publisher = InMemoryEventPublisher::new();
        stage(&store, "21").await;
        publisher.fail_next(1);
        let (relay, _shutdown) = relay_for(&store, &publisher, 3);

        let first = relay.relay_once().await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(store.outbox_status(1), Some((OutboxRowStatus::Pending, 1)));
        assert!(store.outbox_last_error(1).is_some());

        let second = relay.relay_once().await.unwrap();
        assert_eq!(second.published, 1);
        assert_eq!(publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn row_is_parked_after_max_attempts() {
        let store = InMemoryFlashsaleStore::new();
        let publisher = InMemoryEventPublisher::new();
        stage(&store, "31").await;
        publisher.fail_next(2);
        let (relay, _shutdown) = relay_for(&store, &publisher, 2);

        relay.relay_once().await.unwrap();
        relay.relay_once().await.unwrap();

        assert_eq!(store.outbox_status(1), Some((OutboxRowStatus::Failed, 2)));
        assert_eq!(relay.relay_once().await.unwrap().claimed, 0);
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let store = InMemoryFlashsaleStore::new();
        let publisher = InMemoryEventPublisher::new();
        stage(&store, "41").await;
        let (relay, shutdown) = relay_for(&store, &publisher, 3);

        let handle = tokio::spawn(relay.run());
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(publisher.published().len(), 1);
    }
}
