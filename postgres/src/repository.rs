//! `FlashsaleRepository` over `PostgreSQL`.

use crate::{
    DEFINITION_COLUMNS, ORDER_COLUMNS, PostgresFlashsaleStore, db_error, row_to_definition,
    row_to_order, to_db_id,
};
use flashsale_core::BoxFuture;
use flashsale_core::error::StoreError;
use flashsale_core::repository::FlashsaleRepository;
use flashsale_core::types::{
    FlashsaleDefinition, FlashsaleId, FlashsaleOrder, FlashsaleStatus, NewFlashsale, OrderId,
    OrderStatus,
};
use sqlx::Row;

impl FlashsaleRepository for PostgresFlashsaleStore {
    fn create_definition(
        &self,
        sale: NewFlashsale,
    ) -> BoxFuture<'_, Result<FlashsaleDefinition, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                r"
                INSERT INTO flashsales (
                    name, product_id, sku_id, original_price, flash_price,
                    total_stock, limit_per_user, sold_count, start_time, end_time, status
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9, $10)
                RETURNING {DEFINITION_COLUMNS}
                "
            ))
            .bind(&sale.name)
            .bind(to_db_id(sale.product_id.get())?)
            .bind(to_db_id(sale.sku_id.get())?)
            .bind(sale.original_price)
            .bind(sale.flash_price)
            .bind(sale.total_stock)
            .bind(sale.limit_per_user)
            .bind(sale.start_time)
            .bind(sale.end_time)
            .bind(FlashsaleStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("Failed to insert flashsale", &e))?;

            let definition = row_to_definition(&row)?;
            tracing::info!(
                flashsale_id = %definition.id,
                total_stock = definition.total_stock,
                "Flash sale stored"
            );
            Ok(definition)
        })
    }

    fn get_definition(
        &self,
        id: FlashsaleId,
    ) -> BoxFuture<'_, Result<FlashsaleDefinition, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {DEFINITION_COLUMNS} FROM flashsales WHERE id = $1"
            ))
            .bind(to_db_id(id.get())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load flashsale", &e))?
            .ok_or_else(|| StoreError::NotFound(format!("flashsale {id}")))?;

            row_to_definition(&row)
        })
    }

    fn get_order(&self, id: OrderId) -> BoxFuture<'_, Result<FlashsaleOrder, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {ORDER_COLUMNS} FROM flashsale_orders WHERE id = $1"
            ))
            .bind(to_db_id(id.get())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load order", &e))?
            .ok_or_else(|| StoreError::NotFound(format!("order {id}")))?;

            row_to_order(&row)
        })
    }

    fn cancel_pending_order(&self, id: OrderId) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| db_error("Failed to start transaction", &e))?;

            // Conditional transition: only one canceller can win
            let cancelled = sqlx::query(
                r"
                UPDATE flashsale_orders
                SET status = $2
                WHERE id = $1 AND status = $3
                RETURNING flashsale_id, quantity
                ",
            )
            .bind(to_db_id(id.get())?)
            .bind(OrderStatus::Cancelled.as_str())
            .bind(OrderStatus::Pending.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to cancel order", &e))?;

            let Some(row) = cancelled else {
                // Nothing to undo; the outcome stands even if the rollback fails
                if let Err(e) = tx.rollback().await {
                    tracing::warn!(
                        order_id = %id,
                        error = %e,
                        "Rollback of no-op cancel failed"
                    );
                }
                return Ok(false);
            };
            let sale_id: i64 = row
                .try_get("flashsale_id")
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let quantity: i32 = row
                .try_get("quantity")
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            sqlx::query(
                r"
                UPDATE flashsales
                SET sold_count = GREATEST(sold_count - $2, 0)
                WHERE id = $1
                ",
            )
            .bind(sale_id)
            .bind(quantity)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to return sold count", &e))?;

            tx.commit()
                .await
                .map_err(|e| db_error("Failed to commit cancellation", &e))?;

            Ok(true)
        })
    }

    fn sold_quantity(&self, id: FlashsaleId) -> BoxFuture<'_, Result<i64, StoreError>> {
        Box::pin(async move {
            let (sold,): (i64,) = sqlx::query_as(
                r"
                SELECT COALESCE(SUM(quantity), 0)::BIGINT
                FROM flashsale_orders
                WHERE flashsale_id = $1 AND status <> $2
                ",
            )
            .bind(to_db_id(id.get())?)
            .bind(OrderStatus::Cancelled.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("Failed to sum sold quantity", &e))?;

            Ok(sold)
        })
    }
}
