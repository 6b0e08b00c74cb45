//! Sale setup and read operations: create, get, audit.

use crate::cache::LocalSnapshotCache;
use flashsale_core::environment::Clock;
use flashsale_core::error::{FlashsaleError, LedgerError, StoreError};
use flashsale_core::ledger::StockLedger;
use flashsale_core::repository::FlashsaleRepository;
use flashsale_core::types::{FlashsaleDefinition, FlashsaleId, FlashsaleStatus, NewFlashsale};
use std::sync::Arc;
use thiserror::Error;

/// Failure of a read operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// Unknown flash sale.
    #[error("Flash sale {0} not found")]
    NotFound(FlashsaleId),

    /// Repository read failed.
    #[error("Repository error: {0}")]
    Store(#[source] StoreError),

    /// Ledger read failed.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl LookupError {
    fn from_store(id: FlashsaleId, error: StoreError) -> Self {
        match error {
            StoreError::NotFound(_) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}

/// A sale as shown to buyers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlashsaleView {
    /// Definition (possibly a few seconds stale)
    pub definition: FlashsaleDefinition,
    /// Status derived from the window at read time
    pub status: FlashsaleStatus,
    /// Ledger stock left
    pub remaining_stock: i64,
}

/// Durable truth compared with the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StockAudit {
    /// Audited sale
    pub flashsale_id: FlashsaleId,
    /// Units offered
    pub total_stock: i32,
    /// Durable `sold_count` column
    pub sold_count: i32,
    /// Sum of non-cancelled order quantities
    pub sold_quantity: i64,
    /// Ledger stock left
    pub ledger_remaining: i64,
    /// `total_stock - sold_quantity - ledger_remaining`
    ///
    /// Positive: the ledger is understated (e.g. a failed compensation).
    /// Negative: the ledger would sell more than exists.
    pub drift: i64,
    /// `sold_count <= total_stock` according to the aggregate check
    pub within_capacity: bool,
}

impl StockAudit {
    /// No drift and no oversell.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.drift == 0 && self.within_capacity && self.sold_quantity == i64::from(self.sold_count)
    }
}

/// `CreateFlashsale`, `GetFlashsale` and stock audits.
pub struct FlashsaleService {
    repository: Arc<dyn FlashsaleRepository>,
    ledger: Arc<dyn StockLedger>,
    clock: Arc<dyn Clock>,
    cache: Arc<LocalSnapshotCache>,
}

impl FlashsaleService {
    /// Build the service; pass the orchestrator's cache so reads and
    /// admission share snapshots.
    #[must_use]
    pub fn new(
        repository: Arc<dyn FlashsaleRepository>,
        ledger: Arc<dyn StockLedger>,
        clock: Arc<dyn Clock>,
        cache: Arc<LocalSnapshotCache>,
    ) -> Self {
        Self {
            repository,
            ledger,
            clock,
            cache,
        }
    }

    /// Validate, persist as `Pending`, then warm the ledger exactly once.
    ///
    /// # Errors
    ///
    /// - [`FlashsaleError::Invalid`] if a field constraint is violated
    /// - [`FlashsaleError::Store`] if the insert fails
    /// - [`FlashsaleError::Warmup`] if the sale was stored but the ledger
    ///   could not be warmed; warm it again before the window opens
    pub async fn create_flashsale(
        &self,
        sale: NewFlashsale,
    ) -> Result<FlashsaleDefinition, FlashsaleError> {
        sale.validate()?;

        let definition = self.repository.create_definition(sale).await?;
        self.ledger
            .warm(definition.id, definition.total_stock)
            .await
            .map_err(|source| {
                tracing::error!(
                    flashsale_id = %definition.id,
                    error = %source,
                    "Flash sale stored but ledger warm-up failed"
                );
                FlashsaleError::Warmup {
                    id: definition.id,
                    source,
                }
            })?;

        self.cache.insert(definition.clone());
        tracing::info!(
            flashsale_id = %definition.id,
            total_stock = definition.total_stock,
            limit_per_user = definition.limit_per_user,
            start_time = %definition.start_time,
            end_time = %definition.end_time,
            "Flash sale created"
        );
        Ok(definition)
    }

    /// Definition (via the snapshot cache) with the ledger's remaining stock.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] if the sale is unknown or a read fails.
    pub async fn get_flashsale(&self, id: FlashsaleId) -> Result<FlashsaleView, LookupError> {
        let definition = self
            .cache
            .get(id)
            .await
            .map_err(|e| LookupError::from_store(id, e))?;
        let remaining_stock = self.ledger.remaining(id).await?;

        Ok(FlashsaleView {
            status: definition.effective_status(self.clock.now()),
            definition,
            remaining_stock,
        })
    }

    /// Compare durable counters with the ledger.
    ///
    /// Reads the repository directly, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] if the sale is unknown or a read fails.
    pub async fn audit(&self, id: FlashsaleId) -> Result<StockAudit, LookupError> {
        let definition = self
            .repository
            .get_definition(id)
            .await
            .map_err(|e| LookupError::from_store(id, e))?;
        let sold_quantity = self
            .repository
            .sold_quantity(id)
            .await
            .map_err(|e| LookupError::from_store(id, e))?;
        let ledger_remaining = self.ledger.remaining(id).await?;

        let audit = StockAudit {
            flashsale_id: id,
            total_stock: definition.total_stock,
            sold_count: definition.sold_count,
            sold_quantity,
            ledger_remaining,
            drift: i64::from(definition.total_stock) - sold_quantity - ledger_remaining,
            within_capacity: definition.has_capacity(definition.sold_count, 0),
        };

        if audit.is_consistent() {
            tracing::debug!(flashsale_id = %id, "Stock audit clean");
        } else {
            tracing::warn!(
                flashsale_id = %id,
                drift = audit.drift,
                sold_count = audit.sold_count,
                sold_quantity = audit.sold_quantity,
                ledger_remaining = audit.ledger_remaining,
                "Stock audit found drift between ledger and durable store"
            );
        }
        Ok(audit)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::Duration;
    use flashsale_core::types::{ProductId, SkuId};
    use flashsale_testing::{InMemoryFlashsaleStore, InMemoryStockLedger, test_clock};

    fn new_sale(total_stock: i32) -> NewFlashsale {
        let start = test_clock().now() + Duration::minutes(10);
        NewFlashsale {
            name: "Dawn drop".into(),
            product_id: ProductId::new(5),
            sku_id: SkuId::new(50),
            original_price: 5_000,
            flash_price: 2_500,
            total_stock,
            limit_per_user: 1,
            start_time: start,
            end_time: start + Duration::hours(1),
        }
    }

    fn service(store: &InMemoryFlashsaleStore, ledger: &InMemoryStockLedger) -> FlashsaleService {
        let clock = Arc::new(test_clock());
        let cache = Arc::new(LocalSnapshotCache::new(
            Arc::new(store.clone()),
            clock.clone(),
            std::time::Duration::from_secs(3),
        ));
        FlashsaleService::new(Arc::new(store.clone()), Arc::new(ledger.clone()), clock, cache)
    }

    #[tokio::test]
    async fn create_persists_pending_and_warms_once() {
        let store = InMemoryFlashsaleStore::new();
        let ledger = InMemoryStockLedger::new();
        let service = service(&store, &ledger);

        let created = service.create_flashsale(new_sale(100)).await.unwrap();

        assert_eq!(created.status, FlashsaleStatus::Pending);
        assert_eq!(created.sold_count, 0);
        assert_eq!(ledger.warm_calls(), 1);
        assert_eq!(ledger.remaining_now(created.id), 100);
    }

    #[tokio::test]
    async fn invalid_definition_touches_nothing() {
        let store = InMemoryFlashsaleStore::new();
        let ledger = InMemoryStockLedger::new();
        let service = service(&store, &ledger);

        let err = service.create_flashsale(new_sale(0)).await.unwrap_err();

        assert!(matches!(err, FlashsaleError::Invalid(_)));
        assert_eq!(ledger.warm_calls(), 0);
        assert!(store.definition(FlashsaleId::new(1)).is_none());
    }

    #[tokio::test]
    async fn warmup_failure_reports_the_stored_id() {
        let store = InMemoryFlashsaleStore::new();
        let ledger = InMemoryStockLedger::new();
        ledger.set_warm_unavailable(true);
        let service = service(&store, &ledger);

        let err = service.create_flashsale(new_sale(10)).await.unwrap_err();

        let FlashsaleError::Warmup { id, .. } = err else {
            panic!("expected warm-up failure, got {err:?}");
        };
        assert!(store.definition(id).is_some());
    }

    #[tokio::test]
    async fn get_reports_derived_status_and_remaining_stock() {
        let store = InMemoryFlashsaleStore::new();
        let ledger = InMemoryStockLedger::new();
        let service = service(&store, &ledger);
        let created = service.create_flashsale(new_sale(10)).await.unwrap();

        let view = service.get_flashsale(created.id).await.unwrap();

        assert_eq!(view.status, FlashsaleStatus::Pending);
        assert_eq!(view.remaining_stock, 10);
        assert_eq!(
            service.get_flashsale(FlashsaleId::new(42)).await,
            Err(LookupError::NotFound(FlashsaleId::new(42)))
        );
    }

    #[tokio::test]
    async fn audit_of_fresh_sale_is_consistent() {
        let store = InMemoryFlashsaleStore::new();
        let ledger = InMemoryStockLedger::new();
        let service = service(&store, &ledger);
        let created = service.create_flashsale(new_sale(10)).await.unwrap();

        let audit = service.audit(created.id).await.unwrap();

        assert_eq!(audit.drift, 0);
        assert!(audit.is_consistent());
    }
}
