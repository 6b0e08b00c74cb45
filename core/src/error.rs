//! Error types for flash-sale admission.
//!
//! Collaborator errors ([`LedgerError`], [`StoreError`], [`RiskError`],
//! [`PublishError`]) describe transport-level failures of a single port.
//! [`OrderError`] is what callers of `place_order`/`cancel_order` see; it is
//! single-valued, there is no partial success.

use crate::types::{FlashsaleId, OrderId};
use thiserror::Error;

/// Failure talking to the stock ledger.
///
/// "Sold out" is never an error; it is an
/// [`AdmissionOutcome`](crate::ledger::AdmissionOutcome).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Could not reach the ledger store.
    #[error("Ledger connection failed: {0}")]
    Connection(String),

    /// The atomic script failed to execute or returned garbage.
    #[error("Ledger script failed: {0}")]
    Script(String),

    /// The ledger did not answer in time.
    #[error("Ledger call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Failure of the durable store (repository or outbox).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Requested row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A conditional write lost (e.g. sold count would exceed stock).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database connection or query failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failure of the risk collaborator (treated as pass by admission).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RiskError {
    /// Request could not be sent or answered.
    #[error("Risk service unavailable: {0}")]
    Unavailable(String),

    /// Response could not be decoded.
    #[error("Invalid risk response: {0}")]
    InvalidResponse(String),
}

/// Failure publishing a relayed outbox event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Failed to connect to the event transport
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },
}

/// Rejection of a flash-sale definition at creation time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlashsaleError {
    /// Definition violates a field constraint.
    #[error("Invalid flash sale: {0}")]
    Invalid(String),

    /// Status change not allowed from the current status.
    #[error("Cannot move flash sale from {from} to {to}")]
    IllegalTransition {
        /// Current status
        from: crate::types::FlashsaleStatus,
        /// Requested status
        to: crate::types::FlashsaleStatus,
    },

    /// Durable write failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Ledger warm-up failed after the definition was stored.
    #[error("Flash sale {id} stored but ledger warm-up failed: {source}")]
    Warmup {
        /// The stored sale
        id: FlashsaleId,
        /// Underlying ledger failure
        #[source]
        source: LedgerError,
    },
}

/// Outcome error of `place_order` / `cancel_order`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    // ═══════════════════════════════════════════════════════════
    // Domain rejections (expected under contention)
    // ═══════════════════════════════════════════════════════════

    /// Sale window has not opened.
    #[error("Flash sale {0} has not started")]
    NotStarted(FlashsaleId),

    /// Sale window has closed.
    #[error("Flash sale {0} has ended")]
    Ended(FlashsaleId),

    /// Sale was canceled by an operator.
    #[error("Flash sale {0} is closed")]
    SaleClosed(FlashsaleId),

    /// No stock left for the requested quantity.
    #[error("Flash sale {0} is sold out")]
    SoldOut(FlashsaleId),

    /// The user already bought up to the per-user limit.
    #[error("Purchase limit exceeded for flash sale {0}")]
    LimitExceeded(FlashsaleId),

    /// The risk service blocked the purchase.
    #[error("Purchase blocked by risk control (level {level})")]
    RiskBlocked {
        /// Reported risk level
        level: i32,
    },

    /// Quantity must be positive.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i32),

    // ═══════════════════════════════════════════════════════════
    // Read failures (nothing was mutated)
    // ═══════════════════════════════════════════════════════════

    /// Unknown flash sale.
    #[error("Flash sale {0} not found")]
    SaleNotFound(FlashsaleId),

    /// Unknown order.
    #[error("Order {0} not found")]
    OrderNotFound(OrderId),

    /// Repository read or write failed.
    #[error("Repository error: {0}")]
    Repository(#[source] StoreError),

    /// Ledger unreachable; nothing was admitted.
    #[error("Ledger error: {0}")]
    Ledger(#[source] LedgerError),

    // ═══════════════════════════════════════════════════════════
    // System errors after admission
    // ═══════════════════════════════════════════════════════════

    /// Durable commit failed or timed out; the admission was compensated.
    #[error("Order commit failed: {reason}")]
    CommitFailed {
        /// What went wrong in the durable step
        reason: String,
        /// Whether the ledger revert succeeded
        compensated: bool,
    },

    /// The caller's deadline elapsed before admission ran.
    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl OrderError {
    /// Returns `true` for expected domain rejections.
    ///
    /// Rejections are normal outcomes of contention and are not logged at
    /// error severity.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flashsale_core::{OrderError, FlashsaleId};
    /// assert!(OrderError::SoldOut(FlashsaleId::new(1)).is_rejection());
    /// assert!(!OrderError::DeadlineExceeded.is_rejection());
    /// ```
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::NotStarted(_)
                | Self::Ended(_)
                | Self::SaleClosed(_)
                | Self::SoldOut(_)
                | Self::LimitExceeded(_)
                | Self::RiskBlocked { .. }
                | Self::InvalidQuantity(_)
        )
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::NotStarted(_) => "not_started",
            Self::Ended(_) => "ended",
            Self::SaleClosed(_) => "sale_closed",
            Self::SoldOut(_) => "sold_out",
            Self::LimitExceeded(_) => "limit_exceeded",
            Self::RiskBlocked { .. } => "risk_blocked",
            Self::InvalidQuantity(_) => "invalid_quantity",
            Self::SaleNotFound(_) => "sale_not_found",
            Self::OrderNotFound(_) => "order_not_found",
            Self::Repository(_) => "repository",
            Self::Ledger(_) => "ledger",
            Self::CommitFailed { .. } => "commit_failed",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_errors_are_not_rejections() {
        let commit = OrderError::CommitFailed {
            reason: "boom".into(),
            compensated: true,
        };
        assert!(!commit.is_rejection());
        assert!(!OrderError::Ledger(LedgerError::Connection("down".into())).is_rejection());
        assert!(OrderError::LimitExceeded(FlashsaleId::new(2)).is_rejection());
    }

    #[test]
    fn commit_failure_display_includes_reason() {
        let error = OrderError::CommitFailed {
            reason: "insert failed".into(),
            compensated: false,
        };
        assert!(format!("{error}").contains("insert failed"));
    }
}
