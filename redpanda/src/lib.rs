//! Redpanda publisher for flash-sale events.
//!
//! The outbox relay hands committed events to a [`RedpandaEventPublisher`],
//! which implements the [`EventPublisher`] port from `flashsale-core` on top of
//! rdkafka (Kafka-compatible).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  1. Postgres    │
//! │ (order+outbox)  │◄─── Source of truth
//! └────────┬────────┘
//!          │ relay
//!          ▼
//! ┌─────────────────┐
//! │  2. Redpanda    │
//! │   (publish)     │◄─── Distribution
//! └─────────────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once**: the relay marks a row published only after the broker
//! acknowledged it. Messages are keyed by order id, so every event of one
//! order lands on the same partition and consumers deduplicate on that key.

#![forbid(unsafe_code)]

use flashsale_core::BoxFuture;
use flashsale_core::error::PublishError;
use flashsale_core::publisher::EventPublisher;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

const DEFAULT_ACKS: &str = "all";
const DEFAULT_COMPRESSION: &str = "none";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redpanda-backed [`EventPublisher`].
///
/// # Example
///
/// ```no_run
/// use flashsale_redpanda::RedpandaEventPublisher;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// // Basic configuration
/// let publisher = RedpandaEventPublisher::new("localhost:9092")?;
///
/// // Custom configuration
/// let publisher = RedpandaEventPublisher::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventPublisher {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
}

impl RedpandaEventPublisher {
    /// Create a publisher with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, PublishError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the publisher.
    #[must_use]
    pub fn builder() -> RedpandaEventPublisherBuilder {
        RedpandaEventPublisherBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for configuring a [`RedpandaEventPublisher`].
#[derive(Default)]
pub struct RedpandaEventPublisherBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
}

impl RedpandaEventPublisherBuilder {
    /// Set the broker addresses.
    ///
    /// # Parameters
    ///
    /// - `brokers`: Comma-separated list of broker addresses (e.g., "localhost:9092")
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode.
    ///
    /// - `acks`: "0" (no acks), "1" (leader ack), "all" (all replicas ack)
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec ("none", "gzip", "snappy", "lz4", "zstd").
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the delivery timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaEventPublisher`].
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::ConnectionFailed`] if:
    /// - Brokers not set
    /// - Cannot create producer
    pub fn build(self) -> Result<RedpandaEventPublisher, PublishError> {
        let brokers = self.brokers.ok_or_else(|| {
            PublishError::ConnectionFailed("Brokers not configured".to_string())
        })?;
        let acks = self.producer_acks.as_deref().unwrap_or(DEFAULT_ACKS);
        let compression = self.compression.as_deref().unwrap_or(DEFAULT_COMPRESSION);
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression);
        if acks == "all" {
            // Broker-side dedup of producer retries
            producer_config.set("enable.idempotence", "true");
        }

        let producer: FutureProducer = producer_config.create().map_err(|e| {
            PublishError::ConnectionFailed(format!("Failed to create producer: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            acks = acks,
            compression = compression,
            timeout_ms = timeout.as_millis(),
            "RedpandaEventPublisher created successfully"
        );

        Ok(RedpandaEventPublisher {
            producer,
            brokers,
            timeout,
        })
    }
}

impl EventPublisher for RedpandaEventPublisher {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Result<(), PublishError>> {
        Box::pin(async move {
            let record = FutureRecord::to(topic).payload(payload).key(key);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        key = %key,
                        partition = partition,
                        offset = offset,
                        "Event published successfully"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::warn!(
                        topic = %topic,
                        key = %key,
                        error = %kafka_error,
                        "Failed to publish event"
                    );
                    Err(PublishError::PublishFailed {
                        topic: topic.to_string(),
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }
}
