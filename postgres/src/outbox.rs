//! Transactional outbox and relay store over `PostgreSQL`.
//!
//! An order transaction is a plain `sqlx` transaction. Dropping it without
//! `commit` rolls it back, which is what the orchestrator relies on when a
//! durable step times out.

use crate::{PostgresFlashsaleStore, db_error, to_db_id};
use chrono::{DateTime, Utc};
use flashsale_core::BoxFuture;
use flashsale_core::error::StoreError;
use flashsale_core::event::{OutboxMessage, OutboxRecord};
use flashsale_core::outbox::{OutboxRelayStore, OutboxTransaction, TransactionalOutbox};
use flashsale_core::types::{FlashsaleId, FlashsaleOrder};
use sqlx::{Postgres, Row, Transaction};

/// In-flight rows whose claim is older than this are handed out again.
const CLAIM_LEASE_SECS: i32 = 60;

impl TransactionalOutbox for PostgresFlashsaleStore {
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn OutboxTransaction>, StoreError>> {
        Box::pin(async move {
            let tx = self
                .pool
                .begin()
                .await
                .map_err(|e| db_error("Failed to start transaction", &e))?;
            let tx: Box<dyn OutboxTransaction> = Box::new(PostgresOutboxTransaction { tx });
            Ok(tx)
        })
    }
}

/// An open order transaction.
pub struct PostgresOutboxTransaction {
    tx: Transaction<'static, Postgres>,
}

impl OutboxTransaction for PostgresOutboxTransaction {
    fn save_order<'a>(
        &'a mut self,
        order: &'a FlashsaleOrder,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO flashsale_orders (
                    id, flashsale_id, user_id, product_id, sku_id,
                    quantity, unit_price, total_amount, status, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO UPDATE SET
                    quantity = EXCLUDED.quantity,
                    unit_price = EXCLUDED.unit_price,
                    total_amount = EXCLUDED.total_amount,
                    status = EXCLUDED.status
                ",
            )
            .bind(to_db_id(order.id.get())?)
            .bind(to_db_id(order.flashsale_id.get())?)
            .bind(to_db_id(order.user_id.get())?)
            .bind(to_db_id(order.product_id.get())?)
            .bind(to_db_id(order.sku_id.get())?)
            .bind(order.quantity)
            .bind(order.unit_price)
            .bind(order.total_amount)
            .bind(order.status.as_str())
            .bind(order.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to save order", &e))?;
            Ok(())
        })
    }

    fn increment_sold(
        &mut self,
        sale_id: FlashsaleId,
        quantity: i32,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE flashsales
                SET sold_count = sold_count + $2
                WHERE id = $1 AND sold_count + $2 <= total_stock
                ",
            )
            .bind(to_db_id(sale_id.get())?)
            .bind(quantity)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to increment sold count", &e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::Conflict(format!(
                    "sold_count of flashsale {sale_id} would exceed total_stock"
                )));
            }
            Ok(())
        })
    }

    fn enqueue_event<'a>(
        &'a mut self,
        message: &'a OutboxMessage,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO outbox (topic, message_key, payload)
                VALUES ($1, $2, $3)
                ",
            )
            .bind(&message.topic)
            .bind(&message.key)
            .bind(&message.payload)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to enqueue outbox event", &e))?;
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>> {
        Box::pin(async move {
            self.tx
                .commit()
                .await
                .map_err(|e| db_error("Failed to commit transaction", &e))
        })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>> {
        Box::pin(async move {
            self.tx
                .rollback()
                .await
                .map_err(|e| db_error("Failed to roll back transaction", &e))
        })
    }
}

impl OutboxRelayStore for PostgresFlashsaleStore {
    fn claim_pending(&self, limit: i64) -> BoxFuture<'_, Result<Vec<OutboxRecord>, StoreError>> {
        Box::pin(async move {
            // SKIP LOCKED lets several relays drain the table without
            // handing the same row to two of them.
            let rows = sqlx::query(
                r"
                UPDATE outbox
                SET status = 'in_flight', claimed_at = now()
                WHERE id IN (
                    SELECT id FROM outbox
                    WHERE status = 'pending'
                       OR (status = 'in_flight' AND claimed_at < now() - make_interval(secs => $2))
                    ORDER BY id
                    LIMIT $1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING id, topic, message_key, payload, attempts, created_at
                ",
            )
            .bind(limit)
            .bind(f64::from(CLAIM_LEASE_SECS))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to claim outbox rows", &e))?;

            let mut records = rows
                .iter()
                .map(|row| {
                    let get_err = |e: sqlx::Error| StoreError::Serialization(e.to_string());
                    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(get_err)?;
                    Ok(OutboxRecord {
                        id: row.try_get("id").map_err(get_err)?,
                        message: OutboxMessage {
                            topic: row.try_get("topic").map_err(get_err)?,
                            key: row.try_get("message_key").map_err(get_err)?,
                            payload: row.try_get("payload").map_err(get_err)?,
                        },
                        attempts: row.try_get("attempts").map_err(get_err)?,
                        created_at,
                    })
                })
                .collect::<Result<Vec<_>, StoreError>>()?;
            records.sort_by_key(|record| record.id);
            Ok(records)
        })
    }

    fn mark_published(&self, ids: Vec<i64>) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            sqlx::query(
                r"
                UPDATE outbox
                SET status = 'published', published_at = now(), claimed_at = NULL
                WHERE id = ANY($1)
                ",
            )
            .bind(&ids)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to mark outbox rows published", &e))?;
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
            let row = sqlx::query(
                r"
                UPDATE outbox
                SET attempts = attempts + 1,
                    last_error = $2,
                    claimed_at = NULL,
                    status = CASE WHEN attempts + 1 >= $3 THEN 'failed' ELSE 'pending' END
                WHERE id = $1
                RETURNING status
                ",
            )
            .bind(id)
            .bind(&error)
            .bind(max_attempts)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to record outbox failure", &e))?;

            if let Some(row) = row {
                let status: String = row
                    .try_get("status")
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                if status == "failed" {
                    tracing::error!(
                        outbox_id = id,
                        error = %error,
                        max_attempts = max_attempts,
                        "Outbox row parked after exhausting delivery attempts"
                    );
                }
            }
            Ok(())
        })
    }
}
