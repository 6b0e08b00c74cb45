//! Transactional outbox port.
//!
//! The order row and its outbound event are two writes in one transaction.
//! They commit together or not at all, so a crash can never leave an order
//! without a notification or a notification without an order.
//!
//! ```text
//! begin ─► save_order ─► increment_sold ─► enqueue_event ─► commit
//!               │               │                 │
//!               └───────────────┴─── error ───────┴─► rollback
//! ```
//!
//! A transaction handle that is dropped without `commit` rolls back. This is
//! what makes a timed-out durable step equivalent to a failed one.

use crate::error::StoreError;
use crate::event::{OutboxMessage, OutboxRecord};
use crate::types::{FlashsaleId, FlashsaleOrder};
use futures::future::BoxFuture;

/// Source of outbox transactions.
pub trait TransactionalOutbox: Send + Sync {
    /// Open a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if no connection is available.
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn OutboxTransaction>, StoreError>>;
}

/// One open durable transaction.
///
/// Writes are only visible to other readers after [`OutboxTransaction::commit`].
pub trait OutboxTransaction: Send {
    /// Upsert the order row by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn save_order<'a>(&'a mut self, order: &'a FlashsaleOrder)
    -> BoxFuture<'a, Result<(), StoreError>>;

    /// Add `quantity` to the sale's durable `sold_count`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if `sold_count` would exceed
    /// `total_stock`, which fails the transaction.
    fn increment_sold(
        &mut self,
        sale_id: FlashsaleId,
        quantity: i32,
    ) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Stage an outbound event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn enqueue_event<'a>(
        &'a mut self,
        message: &'a OutboxMessage,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Commit every write issued on this handle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the commit fails; nothing is then visible.
    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>>;

    /// Discard every write issued on this handle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the rollback could not be sent. The
    /// transaction is discarded by the store regardless.
    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>>;
}

/// Run `work` inside one outbox transaction.
///
/// Commits when `work` succeeds, rolls back when it fails.
///
/// # Errors
///
/// Returns the error from `begin`, from `work`, or from `commit`.
///
/// # Example
///
/// ```ignore
/// run_in_transaction(outbox.as_ref(), move |tx| Box::pin(async move {
///     tx.save_order(&order).await?;
///     tx.enqueue_event(&message).await
/// })).await?;
/// ```
pub async fn run_in_transaction<T, F>(outbox: &dyn TransactionalOutbox, work: F) -> Result<T, StoreError>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut Box<dyn OutboxTransaction>) -> BoxFuture<'t, Result<T, StoreError>>,
{
    let mut tx = outbox.begin().await?;
    match work(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        },
        Err(error) => {
            if let Err(rollback_error) = tx.rollback().await {
                tracing::warn!(
                    error = %rollback_error,
                    "Outbox rollback failed; transaction discarded by the store"
                );
            }
            Err(error)
        },
    }
}

/// Relay-side access to pending outbox rows.
pub trait OutboxRelayStore: Send + Sync {
    /// Claim up to `limit` pending rows, oldest first.
    ///
    /// Concurrent relays never receive the same row in the same round.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn claim_pending(&self, limit: i64) -> BoxFuture<'_, Result<Vec<OutboxRecord>, StoreError>>;

    /// Mark rows as published.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    fn mark_published(&self, ids: Vec<i64>) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Record a failed delivery; rows reaching `max_attempts` are parked.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    fn mark_failed(
        &self,
        id: i64,
        error: String,
        max_attempts: i32,
    ) -> BoxFuture<'_, Result<(), StoreError>>;
}
