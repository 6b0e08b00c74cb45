//! Prometheus metrics for flash-sale admission.
//!
//! Counters and histograms are recorded through the `metrics` facade from
//! the orchestrator, the snapshot cache and the outbox relay. Without an
//! installed recorder (as in tests) every call is a no-op.
//!
//! # Example
//!
//! ```rust,no_run
//! use flashsale_service::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use thiserror::Error;

/// Orders committed by admission.
pub const ORDERS_PLACED: &str = "flashsale_orders_placed_total";
/// Admission failures, labelled by `reason`.
pub const ORDERS_REJECTED: &str = "flashsale_orders_rejected_total";
/// Compensating reverts, labelled by `outcome` (`reverted` / `failed`).
pub const COMPENSATIONS: &str = "flashsale_compensations_total";
/// Risk calls that failed and were treated as a pass.
pub const RISK_FAIL_OPEN: &str = "flashsale_risk_fail_open_total";
/// Orders cancelled with their stock returned.
pub const ORDERS_CANCELLED: &str = "flashsale_orders_cancelled_total";
/// Snapshot lookups, labelled by `result` (`hit` / `miss`).
pub const SNAPSHOT_CACHE: &str = "flashsale_snapshot_cache_total";
/// Outbox rows delivered.
pub const OUTBOX_RELAYED: &str = "flashsale_outbox_relayed_total";
/// Outbox deliveries or store calls that failed.
pub const OUTBOX_RELAY_ERRORS: &str = "flashsale_outbox_relay_errors_total";
/// End-to-end latency of `place_order`.
pub const PLACE_ORDER_DURATION: &str = "flashsale_place_order_duration_seconds";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build or install the Prometheus exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus exporter with its own HTTP listener.
pub struct MetricsServer {
    addr: SocketAddr,
}

impl MetricsServer {
    /// Create a server that will listen on `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Describe every metric and install the exporter.
    ///
    /// Must run inside a Tokio runtime; the listener is spawned onto it.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if a recorder is already installed
    /// or the listener cannot be set up.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5],
            )
            .map_err(|e| MetricsError::Install(e.to_string()))?
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        register_metrics();
        tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
        Ok(())
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Admission
    describe_counter!(ORDERS_PLACED, "Orders admitted and committed");
    describe_counter!(ORDERS_REJECTED, "Orders refused or failed, by reason");
    describe_counter!(COMPENSATIONS, "Ledger reverts after a failed commit, by outcome");
    describe_counter!(RISK_FAIL_OPEN, "Risk evaluations that failed and were treated as a pass");
    describe_counter!(ORDERS_CANCELLED, "Pending orders cancelled");
    describe_counter!(SNAPSHOT_CACHE, "Definition snapshot lookups, by result");
    describe_histogram!(PLACE_ORDER_DURATION, "Time taken by place_order");

    // Outbox relay
    describe_counter!(OUTBOX_RELAYED, "Outbox rows published");
    describe_counter!(OUTBOX_RELAY_ERRORS, "Outbox publish or store failures");
}
