//! Durable repository port for sale definitions and orders.
//!
//! Order inserts do not go through this port: they are written together with
//! their outbox event via [`TransactionalOutbox`](crate::outbox::TransactionalOutbox).

use crate::error::StoreError;
use crate::types::{FlashsaleDefinition, FlashsaleId, FlashsaleOrder, NewFlashsale, OrderId};
use futures::future::BoxFuture;

/// Durable store of sale definitions and orders.
pub trait FlashsaleRepository: Send + Sync {
    /// Insert a new sale as `Pending` with `sold_count = 0`.
    ///
    /// The store assigns the id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails.
    fn create_definition(
        &self,
        sale: NewFlashsale,
    ) -> BoxFuture<'_, Result<FlashsaleDefinition, StoreError>>;

    /// Load a sale by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the sale does not exist.
    fn get_definition(
        &self,
        id: FlashsaleId,
    ) -> BoxFuture<'_, Result<FlashsaleDefinition, StoreError>>;

    /// Load an order by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the order does not exist.
    fn get_order(&self, id: OrderId) -> BoxFuture<'_, Result<FlashsaleOrder, StoreError>>;

    /// Move a `Pending` order to `Cancelled` and give its quantity back to the
    /// sale's `sold_count`, in one transaction.
    ///
    /// Returns `false` (and changes nothing) if the order was not `Pending`.
    /// Callers rely on this to revert the ledger at most once per order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    fn cancel_pending_order(&self, id: OrderId) -> BoxFuture<'_, Result<bool, StoreError>>;

    /// Sum of quantities of non-cancelled orders for a sale.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn sold_quantity(&self, id: FlashsaleId) -> BoxFuture<'_, Result<i64, StoreError>>;
}
