//! `PostgreSQL` storage for flash-sale admission.
//!
//! This crate provides the durable side of admission. One
//! [`PostgresFlashsaleStore`] over a shared pool implements three ports from
//! `flashsale-core`:
//!
//! - `FlashsaleRepository`: sale definitions, order reads, cancellation
//! - `TransactionalOutbox`: order row, `sold_count` and outbound event in one
//!   transaction
//! - `OutboxRelayStore`: claiming and settling pending outbox rows
//!
//! # Example
//!
//! ```ignore
//! use flashsale_postgres::PostgresFlashsaleStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresFlashsaleStore::connect("postgres://localhost/flashsale", 10, 30).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod outbox;
mod repository;

pub use outbox::PostgresOutboxTransaction;

use flashsale_core::error::StoreError;
use flashsale_core::types::{
    FlashsaleDefinition, FlashsaleId, FlashsaleOrder, FlashsaleStatus, OrderId, OrderStatus,
    ProductId, SkuId, UserId,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;

/// `PostgreSQL`-backed repository, outbox and relay store.
#[derive(Clone, Debug)]
pub struct PostgresFlashsaleStore {
    pool: PgPool,
}

impl PostgresFlashsaleStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the pool cannot connect.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;

        Ok(Self::from_pool(pool))
    }

    /// Create the `flashsales`, `flashsale_orders` and `outbox` tables.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_error(context: &str, e: &sqlx::Error) -> StoreError {
    StoreError::Database(format!("{context}: {e}"))
}

/// Ids are `u64` in the domain and `BIGINT` in the schema.
fn to_db_id(id: u64) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::Serialization(format!("Id {id} exceeds BIGINT")))
}

fn from_db_id(id: i64) -> Result<u64, StoreError> {
    u64::try_from(id).map_err(|_| StoreError::Serialization(format!("Negative id {id} in database")))
}

const DEFINITION_COLUMNS: &str = "id, name, product_id, sku_id, original_price, flash_price, \
    total_stock, limit_per_user, sold_count, start_time, end_time, status, created_at";

const ORDER_COLUMNS: &str = "id, flashsale_id, user_id, product_id, sku_id, quantity, \
    unit_price, total_amount, status, created_at";

fn row_to_definition(row: &PgRow) -> Result<FlashsaleDefinition, StoreError> {
    let get_err = |e: sqlx::Error| StoreError::Serialization(e.to_string());
    let status: String = row.try_get("status").map_err(get_err)?;

    Ok(FlashsaleDefinition {
        id: FlashsaleId::new(from_db_id(row.try_get("id").map_err(get_err)?)?),
        name: row.try_get("name").map_err(get_err)?,
        product_id: ProductId::new(from_db_id(row.try_get("product_id").map_err(get_err)?)?),
        sku_id: SkuId::new(from_db_id(row.try_get("sku_id").map_err(get_err)?)?),
        original_price: row.try_get("original_price").map_err(get_err)?,
        flash_price: row.try_get("flash_price").map_err(get_err)?,
        total_stock: row.try_get("total_stock").map_err(get_err)?,
        limit_per_user: row.try_get("limit_per_user").map_err(get_err)?,
        sold_count: row.try_get("sold_count").map_err(get_err)?,
        start_time: row.try_get("start_time").map_err(get_err)?,
        end_time: row.try_get("end_time").map_err(get_err)?,
        status: FlashsaleStatus::parse(&status)
            .ok_or_else(|| StoreError::Serialization(format!("Invalid flashsale status: {status}")))?,
        created_at: row.try_get("created_at").map_err(get_err)?,
    })
}

fn row_to_order(row: &PgRow) -> Result<FlashsaleOrder, StoreError> {
    let get_err = |e: sqlx::Error| StoreError::Serialization(e.to_string());
    let status: String = row.try_get("status").map_err(get_err)?;

    Ok(FlashsaleOrder {
        id: OrderId::new(from_db_id(row.try_get("id").map_err(get_err)?)?),
        flashsale_id: FlashsaleId::new(from_db_id(row.try_get("flashsale_id").map_err(get_err)?)?),
        user_id: UserId::new(from_db_id(row.try_get("user_id").map_err(get_err)?)?),
        product_id: ProductId::new(from_db_id(row.try_get("product_id").map_err(get_err)?)?),
        sku_id: SkuId::new(from_db_id(row.try_get("sku_id").map_err(get_err)?)?),
        quantity: row.try_get("quantity").map_err(get_err)?,
        unit_price: row.try_get("unit_price").map_err(get_err)?,
        total_amount: row.try_get("total_amount").map_err(get_err)?,
        status: OrderStatus::parse(&status)
            .ok_or_else(|| StoreError::Serialization(format!("Invalid order status: {status}")))?,
        created_at: row.try_get("created_at").map_err(get_err)?,
    })
}
