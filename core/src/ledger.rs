//! Stock ledger port - the atomic fast-path counters.
//!
//! Per sale the ledger holds `remaining_stock[sale]` and
//! `purchased[sale][user]`. They are mutated only through [`StockLedger::warm`],
//! [`StockLedger::try_admit`] and [`StockLedger::revert`]; direct reads are
//! allowed for display and audits.
//!
//! # Atomicity
//!
//! `try_admit` must be one indivisible operation with respect to every other
//! caller on the same sale: either nothing changes or both counters change.
//! It serializes only per sale, never globally. Implementations must use the
//! store's native atomic primitive (a server-side script), not read-then-write.
//!
//! # Invariants
//!
//! - `remaining_stock[sale] >= 0`
//! - `purchased[sale][user] <= limit_per_user` whenever `limit_per_user > 0`
//! - at most one revert is applied per order
//! - `quantity > 0` on every mutation; non-positive quantities are refused

use crate::error::LedgerError;
use crate::types::{FlashsaleId, OrderId, UserId};
use futures::future::BoxFuture;

/// Result of an admission attempt.
///
/// The ledger reports why a request was refused. Callers that only need the
/// boolean view use [`AdmissionOutcome::is_admitted`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdmissionOutcome {
    /// Stock reserved and user quota consumed
    Admitted,
    /// `remaining_stock < quantity`; nothing changed
    SoldOut,
    /// `purchased + quantity > limit_per_user`; nothing changed
    LimitExceeded,
}

impl AdmissionOutcome {
    /// `true` only for [`AdmissionOutcome::Admitted`].
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Atomic admission/reversion engine.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the orchestrator can hold an
/// `Arc<dyn StockLedger>`.
pub trait StockLedger: Send + Sync {
    /// Set `remaining_stock[sale] = total_stock`, overwriting any prior value.
    ///
    /// Call once per sale, at creation time.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on connectivity failure.
    fn warm(&self, sale_id: FlashsaleId, total_stock: i32) -> BoxFuture<'_, Result<(), LedgerError>>;

    /// Atomically reserve `quantity` units for `user_id`.
    ///
    /// Refuses the whole call when stock is short or when
    /// `limit_per_user > 0 && purchased + quantity > limit_per_user`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] for connectivity/script failures and for a
    /// non-positive `quantity`, never for "sold out".
    fn try_admit(
        &self,
        sale_id: FlashsaleId,
        user_id: UserId,
        quantity: i32,
        limit_per_user: i32,
    ) -> BoxFuture<'_, Result<AdmissionOutcome, LedgerError>>;

    /// Atomically give back `quantity` units and user quota for `order_id`.
    ///
    /// The user counter is floor-clamped at zero. Reverts are deduplicated by
    /// order id in the same atomic step, so retrying after an ambiguous
    /// failure (reply lost, timeout) never returns the stock twice.
    ///
    /// Returns `true` when the revert was applied, `false` when this order
    /// had already been reverted.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on connectivity/script failure or a
    /// non-positive `quantity`.
    fn revert(
        &self,
        sale_id: FlashsaleId,
        order_id: OrderId,
        user_id: UserId,
        quantity: i32,
    ) -> BoxFuture<'_, Result<bool, LedgerError>>;

    /// Read `remaining_stock[sale]` (0 if never warmed).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on connectivity failure.
    fn remaining(&self, sale_id: FlashsaleId) -> BoxFuture<'_, Result<i64, LedgerError>>;

    /// Read `purchased[sale][user]` (0 if absent).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on connectivity failure.
    fn purchased(
        &self,
        sale_id: FlashsaleId,
        user_id: UserId,
    ) -> BoxFuture<'_, Result<i64, LedgerError>>;
}
