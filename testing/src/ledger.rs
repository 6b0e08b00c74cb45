//! In-memory stock ledger.
//!
//! A single mutex stands in for the server-side script: every admission runs
//! check-and-mutate under the lock, so concurrent callers observe the same
//! indivisibility as the Redis ledger. The lock is never held across an
//! `.await`.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use flashsale_core::BoxFuture;
use flashsale_core::error::LedgerError;
use flashsale_core::ledger::{AdmissionOutcome, StockLedger};
use flashsale_core::types::{FlashsaleId, OrderId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct LedgerState {
    stock: HashMap<FlashsaleId, i64>,
    purchased: HashMap<(FlashsaleId, UserId), i64>,
    reverted: HashSet<(FlashsaleId, OrderId)>,
}

#[derive(Debug, Default)]
struct Counters {
    warm: AtomicUsize,
    admit: AtomicUsize,
    revert: AtomicUsize,
}

#[derive(Debug, Default)]
struct Faults {
    admit_unavailable: AtomicBool,
    warm_unavailable: AtomicBool,
    failing_reverts: AtomicUsize,
    lost_revert_replies: AtomicUsize,
}

/// In-memory [`StockLedger`] with call counters and fault injection.
///
/// Clones share state.
///
/// # Example
///
/// ```
/// use flashsale_testing::InMemoryStockLedger;
/// use flashsale_core::ledger::{AdmissionOutcome, StockLedger};
/// use flashsale_core::types::{FlashsaleId, UserId};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = InMemoryStockLedger::new();
/// ledger.warm(FlashsaleId::new(1), 1).await?;
/// let outcome = ledger.try_admit(FlashsaleId::new(1), UserId::new(7), 1, 0).await?;
/// assert_eq!(outcome, AdmissionOutcome::Admitted);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryStockLedger {
    state: Arc<Mutex<LedgerState>>,
    counters: Arc<Counters>,
    faults: Arc<Faults>,
}

impl InMemoryStockLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `warm` calls so far.
    #[must_use]
    pub fn warm_calls(&self) -> usize {
        self.counters.warm.load(Ordering::SeqCst)
    }

    /// Number of `try_admit` calls so far (including failed ones).
    #[must_use]
    pub fn admit_calls(&self) -> usize {
        self.counters.admit.load(Ordering::SeqCst)
    }

    /// Number of `revert` calls so far (including failed ones).
    #[must_use]
    pub fn revert_calls(&self) -> usize {
        self.counters.revert.load(Ordering::SeqCst)
    }

    /// Make every `try_admit` fail with a connection error.
    pub fn set_admit_unavailable(&self, unavailable: bool) {
        self.faults.admit_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every `warm` fail with a connection error.
    pub fn set_warm_unavailable(&self, unavailable: bool) {
        self.faults.warm_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `count` reverts fail with a connection error.
    pub fn fail_next_reverts(&self, count: usize) {
        self.faults.failing_reverts.store(count, Ordering::SeqCst);
    }

    /// Apply the next `count` reverts but report a connection error, as when
    /// the reply is lost after the server ran the script.
    pub fn lose_next_revert_replies(&self, count: usize) {
        self.faults.lost_revert_replies.store(count, Ordering::SeqCst);
    }

    /// Current remaining stock (0 if never warmed).
    #[must_use]
    pub fn remaining_now(&self, sale_id: FlashsaleId) -> i64 {
        self.state.lock().unwrap().stock.get(&sale_id).copied().unwrap_or(0)
    }

    /// Current purchased count for a user (0 if absent).
    #[must_use]
    pub fn purchased_now(&self, sale_id: FlashsaleId, user_id: UserId) -> i64 {
        self.state
            .lock()
            .unwrap()
            .purchased
            .get(&(sale_id, user_id))
            .copied()
            .unwrap_or(0)
    }

    fn unavailable() -> LedgerError {
        LedgerError::Connection("injected failure".into())
    }

    fn take_revert_failure(&self) -> bool {
        Self::take_one(&self.faults.failing_reverts)
    }

    fn take_lost_reply(&self) -> bool {
        Self::take_one(&self.faults.lost_revert_replies)
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn require_positive(quantity: i32) -> Result<(), LedgerError> {
        if quantity <= 0 {
            return Err(LedgerError::Script(format!(
                "Quantity must be positive, got {quantity}"
            )));
        }
        Ok(())
    }

    fn admit_locked(
        &self,
        sale_id: FlashsaleId,
        user_id: UserId,
        quantity: i32,
        limit_per_user: i32,
    ) -> AdmissionOutcome {
        let mut state = self.state.lock().unwrap();
        let quantity = i64::from(quantity);
        let stock = state.stock.get(&sale_id).copied().unwrap_or(0);
        if stock < quantity {
            return AdmissionOutcome::SoldOut;
        }
        let bought = state.purchased.get(&(sale_id, user_id)).copied().unwrap_or(0);
        if limit_per_user > 0 && bought + quantity > i64::from(limit_per_user) {
            return AdmissionOutcome::LimitExceeded;
        }
        state.stock.insert(sale_id, stock - quantity);
        state.purchased.insert((sale_id, user_id), bought + quantity);
        AdmissionOutcome::Admitted
    }

    fn revert_locked(
        &self,
        sale_id: FlashsaleId,
        order_id: OrderId,
        user_id: UserId,
        quantity: i32,
    ) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.reverted.insert((sale_id, order_id)) {
            return false;
        }
        let quantity = i64::from(quantity);
        *state.stock.entry(sale_id).or_insert(0) += quantity;
        let bought = state.purchased.get(&(sale_id, user_id)).copied().unwrap_or(0);
        if bought - quantity <= 0 {
            state.purchased.remove(&(sale_id, user_id));
        } else {
            state.purchased.insert((sale_id, user_id), bought - quantity);
        }
        true
    }
}

impl StockLedger for InMemoryStockLedger {
    fn warm(&self, sale_id: FlashsaleId, total_stock: i32) -> BoxFuture<'_, Result<(), LedgerError>> {
        Box::pin(async move {
            self.counters.warm.fetch_add(1, Ordering::SeqCst);
            if self.faults.warm_unavailable.load(Ordering::SeqCst) {
                return Err(Self::unavailable());
            }
            self.state
                .lock()
                .unwrap()
                .stock
                .insert(sale_id, i64::from(total_stock));
            Ok(())
        })
    }

    fn try_admit(
        &self,
        sale_id: FlashsaleId,
        user_id: UserId,
        quantity: i32,
        limit_per_user: i32,
    ) -> BoxFuture<'_, Result<AdmissionOutcome, LedgerError>> {
        Box::pin(async move {
            self.counters.admit.fetch_add(1, Ordering::SeqCst);
            if self.faults.admit_unavailable.load(Ordering::SeqCst) {
                return Err(Self::unavailable());
            }
            Self::require_positive(quantity)?;
            Ok(self.admit_locked(sale_id, user_id, quantity, limit_per_user))
        })
    }

    fn revert(
        &self,
        sale_id: FlashsaleId,
        order_id: OrderId,
        user_id: UserId,
        quantity: i32,
    ) -> BoxFuture<'_, Result<bool, LedgerError>> {
        Box::pin(async move {
            self.counters.revert.fetch_add(1, Ordering::SeqCst);
            if self.take_revert_failure() {
                return Err(Self::unavailable());
            }
            Self::require_positive(quantity)?;
            let applied = self.revert_locked(sale_id, order_id, user_id, quantity);
            if self.take_lost_reply() {
                return Err(LedgerError::Connection("reply lost".into()));
            }
            Ok(applied)
        })
    }

    fn remaining(&self, sale_id: FlashsaleId) -> BoxFuture<'_, Result<i64, LedgerError>> {
        Box::pin(async move { Ok(self.remaining_now(sale_id)) })
    }

    fn purchased(
        &self,
        sale_id: FlashsaleId,
        user_id: UserId,
    ) -> BoxFuture<'_, Result<i64, LedgerError>> {
        Box::pin(async move { Ok(self.purchased_now(sale_id, user_id)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SALE: FlashsaleId = FlashsaleId::new(1);
    const USER: UserId = UserId::new(7);
    const ORDER: OrderId = OrderId::new(70);

    #[tokio::test]
    async fn admit_decrements_both_counters() {
        let ledger = InMemoryStockLedger::new();
        ledger.warm(SALE, 5).await.unwrap();

        let outcome = ledger.try_admit(SALE, USER, 2, 0).await.unwrap();
        assert!(outcome.is_admitted());
        assert_eq!(ledger.remaining_now(SALE), 3);
        assert_eq!(ledger.purchased_now(SALE, USER), 2);
    }

    #[tokio::test]
    async fn refusals_leave_state_untouched() {
        let ledger = InMemoryStockLedger::new();
        ledger.warm(SALE, 3).await.unwrap();

        assert_eq!(
            ledger.try_admit(SALE, USER, 4, 0).await.unwrap(),
            AdmissionOutcome::SoldOut
        );
        ledger.try_admit(SALE, USER, 2, 2).await.unwrap();
        assert_eq!(
            ledger.try_admit(SALE, USER, 1, 2).await.unwrap(),
            AdmissionOutcome::LimitExceeded
        );
        assert_eq!(ledger.remaining_now(SALE), 1);
        assert_eq!(ledger.purchased_now(SALE, USER), 2);
    }

    #[tokio::test]
    async fn unwarmed_sale_is_sold_out() {
        let ledger = InMemoryStockLedger::new();
        assert_eq!(
            ledger.try_admit(SALE, USER, 1, 0).await.unwrap(),
            AdmissionOutcome::SoldOut
        );
    }

    #[tokio::test]
    async fn revert_clamps_user_counter_at_zero() {
        let ledger = InMemoryStockLedger::new();
        ledger.warm(SALE, 3).await.unwrap();
        ledger.try_admit(SALE, USER, 1, 0).await.unwrap();

        ledger.revert(SALE, ORDER, USER, 2).await.unwrap();
        assert_eq!(ledger.purchased_now(SALE, USER), 0);
        assert_eq!(ledger.remaining_now(SALE), 4);
    }

    #[tokio::test]
    async fn injected_revert_failures_are_consumed() {
        let ledger = InMemoryStockLedger::new();
        ledger.fail_next_reverts(1);
        assert!(ledger.revert(SALE, ORDER, USER, 1).await.is_err());
        assert!(ledger.revert(SALE, ORDER, USER, 1).await.is_ok());
        assert_eq!(ledger.revert_calls(), 2);
        assert_eq!(ledger.remaining_now(SALE), 1);
    }

    #[tokio::test]
    async fn repeated_revert_for_an_order_is_a_no_op() {
        let ledger = InMemoryStockLedger::new();
        ledger.warm(SALE, 5).await.unwrap();
        ledger.try_admit(SALE, USER, 1, 0).await.unwrap();

        assert!(ledger.revert(SALE, ORDER, USER, 1).await.unwrap());
        assert!(!ledger.revert(SALE, ORDER, USER, 1).await.unwrap());
        assert_eq!(ledger.remaining_now(SALE), 5);
        assert_eq!(ledger.purchased_now(SALE, USER), 0);
    }

    #[tokio::test]
    async fn lost_reply_still_applies_the_revert() {
        let ledger = InMemoryStockLedger::new();
        ledger.warm(SALE, 5).await.unwrap();
        ledger.try_admit(SALE, USER, 1, 0).await.unwrap();
        ledger.lose_next_revert_replies(1);

        assert!(ledger.revert(SALE, ORDER, USER, 1).await.is_err());
        assert_eq!(ledger.remaining_now(SALE), 5);
        assert!(!ledger.revert(SALE, ORDER, USER, 1).await.unwrap());
        assert_eq!(ledger.remaining_now(SALE), 5);
    }

    #[tokio::test]
    async fn non_positive_quantity_is_rejected() {
        let ledger = InMemoryStockLedger::new();
        ledger.warm(SALE, 5).await.unwrap();

        for quantity in [0, -3] {
            assert!(matches!(
                ledger.try_admit(SALE, USER, quantity, 0).await,
                Err(LedgerError::Script(_))
            ));
            assert!(matches!(
                ledger.revert(SALE, ORDER, USER, quantity).await,
                Err(LedgerError::Script(_))
            ));
        }
        assert_eq!(ledger.remaining_now(SALE), 5);
        assert_eq!(ledger.purchased_now(SALE, USER), 0);
    }

    proptest! {
        #[test]
        fn admit_then_revert_restores_counters(stock in 1i32..100, qty in 1i32..10) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let ledger = InMemoryStockLedger::new();
                ledger.warm(SALE, stock).await.unwrap();
                let outcome = ledger.try_admit(SALE, USER, qty, 0).await.unwrap();
                if outcome.is_admitted() {
                    ledger.revert(SALE, ORDER, USER, qty).await.unwrap();
                }
                assert_eq!(ledger.remaining_now(SALE), i64::from(stock));
                assert_eq!(ledger.purchased_now(SALE, USER), 0);
            });
        }
    }
}
