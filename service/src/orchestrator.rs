//! Order admission.
//!
//! ```text
//! place_order
//!   │ snapshot (cache ─► repository)
//!   │ window check ──────────────────────► NotStarted / Ended / SaleClosed
//!   │ risk (fail-open) ──────────────────► RiskBlocked
//!   │ ledger try_admit ──────────────────► SoldOut / LimitExceeded / Ledger
//!   │ ┌ one transaction ───────────────┐
//!   │ │ save_order                     │
//!   │ │ increment_sold                 │── fail or timeout ─► revert ─► CommitFailed
//!   │ │ enqueue flashsale.order.created│
//!   │ └ commit ────────────────────────┘
//!   ▼
//! FlashsaleOrder (Pending)
//! ```
//!
//! Nothing before the ledger call mutates state, so every rejection up to
//! there is free. After a successful admission exactly one of two things
//! happens: the transaction commits, or the admission is reverted.

use crate::cache::LocalSnapshotCache;
use crate::config::AdmissionConfig;
use crate::metrics::{
    COMPENSATIONS, ORDERS_CANCELLED, ORDERS_PLACED, ORDERS_REJECTED, PLACE_ORDER_DURATION,
    RISK_FAIL_OPEN,
};
use crate::retry::{RetryPolicy, retry_with_backoff};
use flashsale_core::environment::{Clock, OrderIdGenerator};
use flashsale_core::error::{LedgerError, OrderError, StoreError};
use flashsale_core::event::OutboxMessage;
use flashsale_core::ledger::{AdmissionOutcome, StockLedger};
use flashsale_core::outbox::{TransactionalOutbox, run_in_transaction};
use flashsale_core::repository::FlashsaleRepository;
use flashsale_core::risk::{RiskEvaluator, RiskRequest};
use flashsale_core::types::{
    FlashsaleDefinition, FlashsaleId, FlashsaleOrder, OrderId, OrderStatus, UserId,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Coordinates snapshot lookup, risk, ledger admission, the durable order
/// transaction and compensation.
///
/// Cheap to share: hold it in an `Arc` and call it from any number of tasks.
pub struct OrderAdmissionOrchestrator {
    ledger: Arc<dyn StockLedger>,
    repository: Arc<dyn FlashsaleRepository>,
    outbox: Arc<dyn TransactionalOutbox>,
    risk: Arc<dyn RiskEvaluator>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn OrderIdGenerator>,
    cache: Arc<LocalSnapshotCache>,
    config: AdmissionConfig,
    compensation: RetryPolicy,
}

impl OrderAdmissionOrchestrator {
    /// Wire the orchestrator to its collaborators.
    ///
    /// A [`LocalSnapshotCache`] over `repository` is created with
    /// `config.snapshot_ttl`; share it through [`Self::cache`].
    #[must_use]
    pub fn new(
        ledger: Arc<dyn StockLedger>,
        repository: Arc<dyn FlashsaleRepository>,
        outbox: Arc<dyn TransactionalOutbox>,
        risk: Arc<dyn RiskEvaluator>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn OrderIdGenerator>,
        config: AdmissionConfig,
    ) -> Self {
        let cache = Arc::new(LocalSnapshotCache::new(
            Arc::clone(&repository),
            Arc::clone(&clock),
            config.snapshot_ttl,
        ));
        let compensation = RetryPolicy::new(config.compensation_retries);
        Self {
            ledger,
            repository,
            outbox,
            risk,
            clock,
            ids,
            cache,
            config,
            compensation,
        }
    }

    /// Replace the backoff used for compensating reverts.
    #[must_use]
    pub fn with_compensation_policy(mut self, policy: RetryPolicy) -> Self {
        self.compensation = policy;
        self
    }

    /// The definition cache used on the admission path.
    #[must_use]
    pub const fn cache(&self) -> &Arc<LocalSnapshotCache> {
        &self.cache
    }

    /// Admit `quantity` units of `sale_id` for `user_id` and create a pending
    /// order.
    ///
    /// # Errors
    ///
    /// - Domain rejections ([`OrderError::is_rejection`]): the ledger was not
    ///   mutated
    /// - [`OrderError::SaleNotFound`] / [`OrderError::Repository`] /
    ///   [`OrderError::Ledger`]: nothing was admitted
    /// - [`OrderError::CommitFailed`]: the admission was reverted, or
    ///   `compensated: false` if even that failed
    pub async fn place_order(
        &self,
        user_id: UserId,
        sale_id: FlashsaleId,
        quantity: i32,
    ) -> Result<FlashsaleOrder, OrderError> {
        observed(self.admit(user_id, sale_id, quantity, None)).await
    }

    /// [`Self::place_order`] bounded by a caller deadline.
    ///
    /// If the deadline passes before the ledger is called, the call fails
    /// with [`OrderError::DeadlineExceeded`] and nothing is mutated. Once
    /// admitted, the durable step gets whatever is left of the deadline (at
    /// most the commit timeout); running out is handled like a failed commit.
    ///
    /// # Errors
    ///
    /// As [`Self::place_order`], plus [`OrderError::DeadlineExceeded`].
    pub async fn place_order_with_deadline(
        &self,
        user_id: UserId,
        sale_id: FlashsaleId,
        quantity: i32,
        deadline: Instant,
    ) -> Result<FlashsaleOrder, OrderError> {
        observed(self.admit(user_id, sale_id, quantity, Some(deadline))).await
    }

    /// Cancel a pending order and return its stock and user quota.
    ///
    /// Cancelling an order that is no longer pending (paid, or already
    /// cancelled by a concurrent caller) succeeds without doing anything.
    ///
    /// # Errors
    ///
    /// - [`OrderError::OrderNotFound`] if the order does not exist
    /// - [`OrderError::Repository`] if the durable update fails
    /// - [`OrderError::Ledger`] if the order was cancelled but the ledger
    ///   could not be restored (logged as critical)
    ///
    /// # Recovery
    ///
    /// The durable cancel commits before the ledger revert. If every revert
    /// attempt fails, the order is already `Cancelled`, so calling this again
    /// is a no-op and does not retry the revert. The understated stock then
    /// shows up only as drift in [`FlashsaleService::audit`], which is the
    /// sole way to detect and repair it.
    ///
    /// [`FlashsaleService::audit`]: crate::FlashsaleService::audit
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<(), OrderError> {
        let order = self.repository.get_order(order_id).await.map_err(|e| match e {
            StoreError::NotFound(_) => OrderError::OrderNotFound(order_id),
            other => OrderError::Repository(other),
        })?;

        if order.status != OrderStatus::Pending {
            tracing::debug!(order_id = %order_id, status = %order.status, "Order not pending; cancel is a no-op");
            return Ok(());
        }

        let cancelled = self
            .repository
            .cancel_pending_order(order_id)
            .await
            .map_err(OrderError::Repository)?;
        if !cancelled {
            tracing::debug!(order_id = %order_id, "Order left pending concurrently; cancel is a no-op");
            return Ok(());
        }

        self.revert(&order).await.map_err(OrderError::Ledger)?;

        metrics::counter!(ORDERS_CANCELLED).increment(1);
        tracing::info!(
            order_id = %order_id,
            flashsale_id = %order.flashsale_id,
            quantity = order.quantity,
            "Order cancelled and stock returned"
        );
        Ok(())
    }

    async fn admit(
        &self,
        user_id: UserId,
        sale_id: FlashsaleId,
        quantity: i32,
        deadline: Option<Instant>,
    ) -> Result<FlashsaleOrder, OrderError> {
        if quantity <= 0 {
            return Err(OrderError::InvalidQuantity(quantity));
        }

        let sale = within(deadline, self.screen(user_id, sale_id, quantity)).await?;
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(OrderError::DeadlineExceeded);
        }

        match self.try_admit(&sale, user_id, quantity).await? {
            AdmissionOutcome::Admitted => {},
            AdmissionOutcome::SoldOut => {
                tracing::debug!(flashsale_id = %sale_id, user_id = %user_id, "Sold out");
                return Err(OrderError::SoldOut(sale_id));
            },
            AdmissionOutcome::LimitExceeded => {
                tracing::debug!(flashsale_id = %sale_id, user_id = %user_id, "Purchase limit reached");
                return Err(OrderError::LimitExceeded(sale_id));
            },
        }

        let order = FlashsaleOrder::pending(
            self.ids.next_id(),
            &sale,
            user_id,
            quantity,
            self.clock.now(),
        );
        let budget = deadline.map_or(self.config.commit_timeout, |d| {
            d.saturating_duration_since(Instant::now())
                .min(self.config.commit_timeout)
        });

        match self.commit(order.clone(), budget).await {
            Ok(()) => {
                tracing::info!(
                    order_id = %order.id,
                    flashsale_id = %sale_id,
                    user_id = %user_id,
                    quantity,
                    "Order placed"
                );
                Ok(order)
            },
            Err(reason) => {
                tracing::error!(
                    order_id = %order.id,
                    flashsale_id = %sale_id,
                    user_id = %user_id,
                    error = %reason,
                    "Order commit failed; reverting admission"
                );
                let compensated = self.compensate(&order).await;
                Err(OrderError::CommitFailed {
                    reason,
                    compensated,
                })
            },
        }
    }

    /// Snapshot, window and risk: everything that can refuse without
    /// touching the ledger.
    async fn screen(
        &self,
        user_id: UserId,
        sale_id: FlashsaleId,
        quantity: i32,
    ) -> Result<FlashsaleDefinition, OrderError> {
        let sale = self.cache.get(sale_id).await.map_err(|e| match e {
            StoreError::NotFound(_) => OrderError::SaleNotFound(sale_id),
            other => OrderError::Repository(other),
        })?;

        if let Err(rejection) = sale.check_admission_window(self.clock.now()) {
            tracing::debug!(flashsale_id = %sale_id, reason = rejection.reason(), "Outside sale window");
            return Err(rejection);
        }

        let request = RiskRequest {
            user_id,
            amount: sale.flash_price.saturating_mul(i64::from(quantity)),
        };
        match self.risk.evaluate(&request).await {
            Ok(verdict) if verdict.blocks(self.config.risk_block_threshold) => {
                tracing::debug!(user_id = %user_id, risk_level = verdict.risk_level, "Blocked by risk control");
                return Err(OrderError::RiskBlocked {
                    level: verdict.risk_level,
                });
            },
            Ok(_) => {},
            Err(error) => {
                // Fail open: an unavailable risk service must not stop the sale
                metrics::counter!(RISK_FAIL_OPEN).increment(1);
                tracing::warn!(user_id = %user_id, error = %error, "Risk check failed; admitting without it");
            },
        }

        Ok(sale)
    }

    async fn try_admit(
        &self,
        sale: &FlashsaleDefinition,
        user_id: UserId,
        quantity: i32,
    ) -> Result<AdmissionOutcome, OrderError> {
        let timeout = self.config.ledger_timeout;
        let call = self
            .ledger
            .try_admit(sale.id, user_id, quantity, sale.limit_per_user);

        match tokio::time::timeout(timeout, call).await {
            Ok(outcome) => outcome.map_err(OrderError::Ledger),
            Err(_) => Err(OrderError::Ledger(LedgerError::Timeout(timeout))),
        }
    }

    /// Order row, `sold_count` and event in one transaction.
    ///
    /// A timeout drops the transaction handle, which rolls it back.
    async fn commit(&self, order: FlashsaleOrder, budget: Duration) -> Result<(), String> {
        let message = OutboxMessage::order_created(&order).map_err(|e| e.to_string())?;

        let work = run_in_transaction(self.outbox.as_ref(), move |tx| {
            Box::pin(async move {
                tx.save_order(&order).await?;
                tx.increment_sold(order.flashsale_id, order.quantity).await?;
                tx.enqueue_event(&message).await
            })
        });

        match tokio::time::timeout(budget, work).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(error.to_string()),
            Err(_) => Err(format!("commit timed out after {budget:?}")),
        }
    }

    /// Undo the admission of an order whose commit failed.
    async fn compensate(&self, order: &FlashsaleOrder) -> bool {
        match self.revert(order).await {
            Ok(_) => {
                metrics::counter!(COMPENSATIONS, "outcome" => "reverted").increment(1);
                tracing::warn!(
                    order_id = %order.id,
                    flashsale_id = %order.flashsale_id,
                    quantity = order.quantity,
                    "Admission reverted after failed commit"
                );
                true
            },
            Err(_) => {
                metrics::counter!(COMPENSATIONS, "outcome" => "failed").increment(1);
                false
            },
        }
    }

    /// Revert with retries; a final failure is logged as critical because
    /// remaining stock is now understated.
    ///
    /// The ledger deduplicates by order id, so an attempt whose reply was
    /// lost is safe to retry.
    async fn revert(&self, order: &FlashsaleOrder) -> Result<(), LedgerError> {
        let result = retry_with_backoff(&self.compensation, || {
            self.ledger
                .revert(order.flashsale_id, order.id, order.user_id, order.quantity)
        })
        .await;

        if let Ok(false) = result {
            tracing::debug!(
                order_id = %order.id,
                "Revert already applied by an earlier attempt"
            );
        }
        if let Err(error) = &result {
            tracing::error!(
                target: "flashsale::compensation",
                critical = true,
                order_id = %order.id,
                flashsale_id = %order.flashsale_id,
                user_id = %order.user_id,
                quantity = order.quantity,
                error = %error,
                "Ledger revert failed; remaining stock is understated and needs operator repair"
            );
        }
        result.map(|_| ())
    }
}

impl std::fmt::Debug for OrderAdmissionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderAdmissionOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Record latency and outcome of one `place_order` call.
async fn observed(
    attempt: impl Future<Output = Result<FlashsaleOrder, OrderError>>,
) -> Result<FlashsaleOrder, OrderError> {
    let started = Instant::now();
    let result = attempt.await;
    metrics::histogram!(PLACE_ORDER_DURATION).record(started.elapsed().as_secs_f64());

    match &result {
        Ok(_) => metrics::counter!(ORDERS_PLACED).increment(1),
        Err(error) => {
            metrics::counter!(ORDERS_REJECTED, "reason" => error.reason()).increment(1);
        },
    }
    result
}

async fn within<T>(
    deadline: Option<Instant>,
    work: impl Future<Output = Result<T, OrderError>>,
) -> Result<T, OrderError> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, work)
            .await
            .map_err(|_| OrderError::DeadlineExceeded)?,
        None => work.await,
    }
}
