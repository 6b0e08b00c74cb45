//! In-memory durable store.
//!
//! One shared state backs three ports: [`FlashsaleRepository`],
//! [`TransactionalOutbox`] and [`OutboxRelayStore`]. Transactions stage their
//! writes privately and apply them under the state lock at commit, so an
//! uncommitted (or dropped) transaction leaves no trace.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use chrono::Utc;
use flashsale_core::BoxFuture;
use flashsale_core::error::StoreError;
use flashsale_core::event::{OutboxMessage, OutboxRecord};
use flashsale_core::outbox::{OutboxRelayStore, OutboxTransaction, TransactionalOutbox};
use flashsale_core::repository::FlashsaleRepository;
use flashsale_core::types::{
    FlashsaleDefinition, FlashsaleId, FlashsaleOrder, FlashsaleStatus, NewFlashsale, OrderId,
    OrderStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Where an injected failure strikes inside an outbox transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailPoint {
    /// `begin` fails
    Begin,
    /// `save_order` fails
    SaveOrder,
    /// `increment_sold` fails
    IncrementSold,
    /// `enqueue_event` fails
    EnqueueEvent,
    /// `commit` fails after all writes were staged
    Commit,
    /// `commit` stalls for the given duration before applying
    SlowCommit(Duration),
}

/// Relay status of an outbox row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutboxRowStatus {
    /// Awaiting delivery
    Pending,
    /// Delivered
    Published,
    /// Parked after too many failed attempts
    Failed,
}

#[derive(Clone, Debug)]
struct OutboxRow {
    record: OutboxRecord,
    status: OutboxRowStatus,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
struct StoreState {
    next_sale_id: u64,
    next_outbox_id: i64,
    definitions: HashMap<FlashsaleId, FlashsaleDefinition>,
    orders: HashMap<OrderId, FlashsaleOrder>,
    outbox: Vec<OutboxRow>,
    fail_point: Option<FailPoint>,
}

fn apply_sold(
    definitions: &mut HashMap<FlashsaleId, FlashsaleDefinition>,
    sale_id: FlashsaleId,
    quantity: i32,
) -> Result<(), StoreError> {
    let sale = definitions
        .get_mut(&sale_id)
        .ok_or_else(|| StoreError::NotFound(format!("flashsale {sale_id}")))?;
    if !sale.has_capacity(sale.sold_count, quantity) {
        return Err(StoreError::Conflict(format!(
            "sold_count {} + {quantity} exceeds total_stock {}",
            sale.sold_count, sale.total_stock
        )));
    }
    sale.sold_count += quantity;
    Ok(())
}

#[derive(Debug, Default)]
struct Counters {
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    definition_reads: AtomicUsize,
}

/// In-memory repository, outbox and relay store.
///
/// Clones share state.
///
/// # Example
///
/// ```
/// use flashsale_testing::{FailPoint, InMemoryFlashsaleStore};
///
/// let store = InMemoryFlashsaleStore::new();
/// store.fail_at(FailPoint::EnqueueEvent);
/// assert!(store.orders().is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryFlashsaleStore {
    state: Arc<Mutex<StoreState>>,
    counters: Arc<Counters>,
}

impl InMemoryFlashsaleStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure into every subsequent transaction.
    pub fn fail_at(&self, point: FailPoint) {
        self.state.lock().unwrap().fail_point = Some(point);
    }

    /// Remove any injected failure.
    pub fn clear_failure(&self) {
        self.state.lock().unwrap().fail_point = None;
    }

    /// Insert or replace a definition as-is.
    pub fn put_definition(&self, sale: FlashsaleDefinition) {
        let mut state = self.state.lock().unwrap();
        state.next_sale_id = state.next_sale_id.max(sale.id.get());
        state.definitions.insert(sale.id, sale);
    }

    /// Overwrite a sale's status.
    pub fn set_status(&self, id: FlashsaleId, status: FlashsaleStatus) {
        if let Some(sale) = self.state.lock().unwrap().definitions.get_mut(&id) {
            sale.status = status;
        }
    }

    /// Stored definition, if any.
    #[must_use]
    pub fn definition(&self, id: FlashsaleId) -> Option<FlashsaleDefinition> {
        self.state.lock().unwrap().definitions.get(&id).cloned()
    }

    /// All committed orders.
    #[must_use]
    pub fn orders(&self) -> Vec<FlashsaleOrder> {
        self.state.lock().unwrap().orders.values().cloned().collect()
    }

    /// All committed outbox messages, oldest first.
    #[must_use]
    pub fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.state
            .lock()
            .unwrap()
            .outbox
            .iter()
            .map(|row| row.record.message.clone())
            .collect()
    }

    /// Status and attempt count of an outbox row.
    #[must_use]
    pub fn outbox_status(&self, id: i64) -> Option<(OutboxRowStatus, i32)> {
        self.state
            .lock()
            .unwrap()
            .outbox
            .iter()
            .find(|row| row.record.id == id)
            .map(|row| (row.status, row.record.attempts))
    }

    /// Last delivery error recorded on an outbox row.
    #[must_use]
    pub fn outbox_last_error(&self, id: i64) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .outbox
            .iter()
            .find(|row| row.record.id == id)
            .and_then(|row| row.last_error.clone())
    }

    /// Number of committed transactions.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.counters.commits.load(Ordering::SeqCst)
    }

    /// Number of transactions that ended without committing.
    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.counters.rollbacks.load(Ordering::SeqCst)
    }

    /// Number of `get_definition` calls served.
    #[must_use]
    pub fn definition_reads(&self) -> usize {
        self.counters.definition_reads.load(Ordering::SeqCst)
    }

    fn injected(point: FailPoint) -> StoreError {
        StoreError::Database(format!("injected failure at {point:?}"))
    }
}

impl FlashsaleRepository for InMemoryFlashsaleStore {
    fn create_definition(
        &self,
        sale: NewFlashsale,
    ) -> BoxFuture<'_, Result<FlashsaleDefinition, StoreError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.next_sale_id += 1;
            let definition = FlashsaleDefinition {
                id: FlashsaleId::new(state.next_sale_id),
                name: sale.name,
                product_id: sale.product_id,
                sku_id: sale.sku_id,
                original_price: sale.original_price,
                flash_price: sale.flash_price,
                total_stock: sale.total_stock,
                limit_per_user: sale.limit_per_user,
                sold_count: 0,
                start_time: sale.start_time,
                end_time: sale.end_time,
                status: FlashsaleStatus::Pending,
                created_at: Utc::now(),
            };
            state.definitions.insert(definition.id, definition.clone());
            Ok(definition)
        })
    }

    fn get_definition(
        &self,
        id: FlashsaleId,
    ) -> BoxFuture<'_, Result<FlashsaleDefinition, StoreError>> {
        Box::pin(async move {
            self.counters.definition_reads.fetch_add(1, Ordering::SeqCst);
            self.definition(id)
                .ok_or_else(|| StoreError::NotFound(format!("flashsale {id}")))
        })
    }

    fn get_order(&self, id: OrderId) -> BoxFuture<'_, Result<FlashsaleOrder, StoreError>> {
        Box::pin(async move {
            self.state
                .lock()
                .unwrap()
                .orders
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("order {id}")))
        })
    }

    fn cancel_pending_order(&self, id: OrderId) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let Some(order) = state.orders.get_mut(&id) else {
                return Ok(false);
            };
            if order.status != OrderStatus::Pending {
                return Ok(false);
            }
            order.status = OrderStatus::Cancelled;
            let (sale_id, quantity) = (order.flashsale_id, order.quantity);
            if let Some(sale) = state.definitions.get_mut(&sale_id) {
                sale.sold_count = (sale.sold_count - quantity).max(0);
            }
            Ok(true)
        })
    }

    fn sold_quantity(&self, id: FlashsaleId) -> BoxFuture<'_, Result<i64, StoreError>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .unwrap()
                .orders
                .values()
                .filter(|o| o.flashsale_id == id && o.status != OrderStatus::Cancelled)
                .map(|o| i64::from(o.quantity))
                .sum())
        })
    }
}

impl TransactionalOutbox for InMemoryFlashsaleStore {
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn OutboxTransaction>, StoreError>> {
        Box::pin(async move {
            let fail_point = self.state.lock().unwrap().fail_point;
            if fail_point == Some(FailPoint::Begin) {
                return Err(Self::injected(FailPoint::Begin));
            }
            let tx: Box<dyn OutboxTransaction> = Box::new(InMemoryTransaction {
                state: Arc::clone(&self.state),
                counters: Arc::clone(&self.counters),
                fail_point,
                orders: Vec::new(),
                sold: Vec::new(),
                events: Vec::new(),
                finished: false,
            });
            Ok(tx)
        })
    }
}

impl OutboxRelayStore for InMemoryFlashsaleStore {
    fn claim_pending(&self, limit: i64) -> BoxFuture<'_, Result<Vec<OutboxRecord>, StoreError>> {
        Box::pin(async move {
            let limit = usize::try_from(limit).unwrap_or(0);
            Ok(self
                .state
                .lock()
                .unwrap()
                .outbox
                .iter()
                .filter(|row| row.status == OutboxRowStatus::Pending)
                .take(limit)
                .map(|row| row.record.clone())
                .collect())
        })
    }

    fn mark_published(&self, ids: Vec<i64>) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            for row in state.outbox.iter_mut().filter(|row| ids.contains(&row.record.id)) {
                row.status = OutboxRowStatus::Published;
            }
            Ok(())
        })
    }

    fn mark_failed(
        &self,
        id: i64,
        error: String,
        max_attempts: i32,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if let Some(row) = state.outbox.iter_mut().find(|row| row.record.id == id) {
                row.record.attempts += 1;
                row.last_error = Some(error);
                if row.record.attempts >= max_attempts {
                    row.status = OutboxRowStatus::Failed;
                }
            }
            Ok(())
        })
    }
}

/// Staged writes of one in-memory transaction.
struct InMemoryTransaction {
    state: Arc<Mutex<StoreState>>,
    counters: Arc<Counters>,
    fail_point: Option<FailPoint>,
    orders: Vec<FlashsaleOrder>,
    sold: Vec<(FlashsaleId, i32)>,
    events: Vec<OutboxMessage>,
    finished: bool,
}

impl InMemoryTransaction {
    fn check(&self, point: FailPoint) -> Result<(), StoreError> {
        if self.fail_point == Some(point) {
            return Err(InMemoryFlashsaleStore::injected(point));
        }
        Ok(())
    }

    /// Apply staged writes all-or-nothing.
    fn apply(&mut self) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();

        let mut definitions = state.definitions.clone();
        for (sale_id, quantity) in &self.sold {
            apply_sold(&mut definitions, *sale_id, *quantity)?;
        }
        state.definitions = definitions;

        for order in self.orders.drain(..) {
            state.orders.insert(order.id, order);
        }
        for message in self.events.drain(..) {
            state.next_outbox_id += 1;
            let id = state.next_outbox_id;
            state.outbox.push(OutboxRow {
                record: OutboxRecord {
                    id,
                    message,
                    attempts: 0,
                    created_at: Utc::now(),
                },
                status: OutboxRowStatus::Pending,
                last_error: None,
            });
        }
        Ok(())
    }

    fn finish(&mut self, committed: bool) {
        self.finished = true;
        if committed {
            self.counters.commits.fetch_add(1, Ordering::SeqCst);
        } else {
            self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl OutboxTransaction for InMemoryTransaction {
    fn save_order<'a>(
        &'a mut self,
        order: &'a FlashsaleOrder,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.check(FailPoint::SaveOrder)?;
            self.orders.retain(|o| o.id != order.id);
            self.orders.push(order.clone());
            Ok(())
        })
    }

    fn increment_sold(
        &mut self,
        sale_id: FlashsaleId,
        quantity: i32,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.check(FailPoint::IncrementSold)?;
            let state = self.state.lock().unwrap();
            let sale = state
                .definitions
                .get(&sale_id)
                .ok_or_else(|| StoreError::NotFound(format!("flashsale {sale_id}")))?;
            let staged: i32 = self
                .sold
                .iter()
                .filter(|(id, _)| *id == sale_id)
                .map(|(_, q)| *q)
                .sum();
            if !sale.has_capacity(sale.sold_count + staged, quantity) {
                return Err(StoreError::Conflict(format!(
                    "sold_count would exceed total_stock {}",
                    sale.total_stock
                )));
            }
            drop(state);
            self.sold.push((sale_id, quantity));
            Ok(())
        })
    }

    fn enqueue_event<'a>(
        &'a mut self,
        message: &'a OutboxMessage,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.check(FailPoint::EnqueueEvent)?;
            self.events.push(message.clone());
            Ok(())
        })
    }

    fn commit(mut self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>> {
        Box::pin(async move {
            match self.fail_point {
                Some(FailPoint::Commit) => {
                    self.finish(false);
                    return Err(InMemoryFlashsaleStore::injected(FailPoint::Commit));
                },
                Some(FailPoint::SlowCommit(delay)) => tokio::time::sleep(delay).await,
                _ => {},
            }
            let result = self.apply();
            self.finish(result.is_ok());
            result
        })
    }

    fn rollback(mut self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>> {
        Box::pin(async move {
            self.finish(false);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashsale_core::outbox::run_in_transaction;
    use chrono::DateTime;
    use flashsale_core::types::{ProductId, SkuId, UserId};

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    fn new_sale(stock: i32) -> NewFlashsale {
        NewFlashsale {
            name: "Doorbuster".into(),
            product_id: ProductId::new(10),
            sku_id: SkuId::new(100),
            original_price: 2_000,
            flash_price: 1_000,
            total_stock: stock,
            limit_per_user: 0,
            start_time: at("2025-01-01T00:00:00Z"),
            end_time: at("2025-01-01T01:00:00Z"),
        }
    }

    fn order(id: u64, sale: &FlashsaleDefinition, quantity: i32) -> FlashsaleOrder {
        FlashsaleOrder::pending(OrderId::new(id), sale, UserId::new(id), quantity, sale.start_time)
    }

    async fn place(store: &InMemoryFlashsaleStore, order: FlashsaleOrder) -> Result<(), StoreError> {
        let message = OutboxMessage::order_created(&order)?;
        run_in_transaction(store, move |tx| {
            Box::pin(async move {
                tx.save_order(&order).await?;
                tx.increment_sold(order.flashsale_id, order.quantity).await?;
                tx.enqueue_event(&message).await
            })
        })
        .await
    }

    #[tokio::test]
    async fn committed_transaction_writes_order_and_event_together() {
        let store = InMemoryFlashsaleStore::new();
        let sale = store.create_definition(new_sale(5)).await.unwrap();

        place(&store, order(1, &sale, 2)).await.unwrap();

        assert_eq!(store.orders().len(), 1);
        assert_eq!(store.outbox_messages().len(), 1);
        assert_eq!(store.definition(sale.id).unwrap().sold_count, 2);
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn failed_enqueue_leaves_no_order() {
        let store = InMemoryFlashsaleStore::new();
        let sale = store.create_definition(new_sale(5)).await.unwrap();
        store.fail_at(FailPoint::EnqueueEvent);

        assert!(place(&store, order(1, &sale, 1)).await.is_err());

        assert!(store.orders().is_empty());
        assert!(store.outbox_messages().is_empty());
        assert_eq!(store.definition(sale.id).unwrap().sold_count, 0);
        assert_eq!(store.rollbacks(), 1);
    }

    #[tokio::test]
    async fn sold_count_cannot_pass_total_stock() {
        let store = InMemoryFlashsaleStore::new();
        let sale = store.create_definition(new_sale(1)).await.unwrap();

        place(&store, order(1, &sale, 1)).await.unwrap();
        let err = place(&store, order(2, &sale, 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn dropped_transaction_counts_as_rollback() {
        let store = InMemoryFlashsaleStore::new();
        let sale = store.create_definition(new_sale(1)).await.unwrap();
        {
            let mut tx = store.begin().await.unwrap();
            tx.save_order(&order(1, &sale, 1)).await.unwrap();
        }
        assert!(store.orders().is_empty());
        assert_eq!(store.rollbacks(), 1);
    }

    #[tokio::test]
    async fn cancel_only_moves_pending_orders() {
        let store = InMemoryFlashsaleStore::new();
        let sale = store.create_definition(new_sale(3)).await.unwrap();
        place(&store, order(1, &sale, 2)).await.unwrap();

        assert!(store.cancel_pending_order(OrderId::new(1)).await.unwrap());
        assert!(!store.cancel_pending_order(OrderId::new(1)).await.unwrap());
        assert_eq!(store.definition(sale.id).unwrap().sold_count, 0);
        assert_eq!(store.sold_quantity(sale.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn relay_rows_park_after_max_attempts() {
        let store = InMemoryFlashsaleStore::new();
        let sale = store.create_definition(new_sale(3)).await.unwrap();
        place(&store, order(1, &sale, 1)).await.unwrap();

        let claimed = store.claim_pending(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        let id = claimed[0].id;

        store.mark_failed(id, "broker down".into(), 2).await.unwrap();
        assert_eq!(store.outbox_status(id), Some((OutboxRowStatus::Pending, 1)));
        store.mark_failed(id, "broker down".into(), 2).await.unwrap();
        assert_eq!(store.outbox_status(id), Some((OutboxRowStatus::Failed, 2)));
        assert!(store.claim_pending(10).await.unwrap().is_empty());
    }
}
