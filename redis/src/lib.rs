//! Redis stock ledger for flash-sale admission.
//!
//! # Key Layout
//!
//! ```text
//! {prefix}:{<sale_id>}:stock       STRING  remaining stock
//! {prefix}:{<sale_id>}:purchased   HASH    user_id -> units bought
//! {prefix}:{<sale_id>}:reverted    SET     order ids already reverted
//! ```
//!
//! All keys of a sale share the `{<sale_id>}` hash tag, so Redis Cluster
//! places them in the same slot and one script can touch both.
//!
//! # Atomicity
//!
//! Admission and reversion run as Lua scripts. Redis executes a script to
//! completion before serving any other command, so check-and-mutate is
//! indivisible without any client-side locking. Different sales live under
//! different keys and never contend on a lock.

#![forbid(unsafe_code)]

use flashsale_core::BoxFuture;
use flashsale_core::error::LedgerError;
use flashsale_core::ledger::{AdmissionOutcome, StockLedger};
use flashsale_core::types::{FlashsaleId, OrderId, UserId};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

/// Reserve stock and user quota in one step.
///
/// KEYS: stock, purchased. ARGV: user, quantity, limit (0 = unlimited).
/// Returns 1 admitted, 0 sold out, 2 limit exceeded.
const ADMIT_SCRIPT: &str = r"
local qty = tonumber(ARGV[2])
if qty == nil or qty <= 0 then
    return redis.error_reply('quantity must be positive')
end
local stock = tonumber(redis.call('GET', KEYS[1]) or '0')
if stock < qty then
    return 0
end
local limit = tonumber(ARGV[3])
local bought = tonumber(redis.call('HGET', KEYS[2], ARGV[1]) or '0')
if limit > 0 and bought + qty > limit then
    return 2
end
redis.call('DECRBY', KEYS[1], qty)
redis.call('HINCRBY', KEYS[2], ARGV[1], qty)
return 1
";

/// Give back stock and user quota once per order; the user counter never goes
/// below zero.
///
/// KEYS: stock, purchased, reverted. ARGV: user, quantity, order.
/// Returns 1 applied, 0 already applied for this order.
const REVERT_SCRIPT: &str = r"
local qty = tonumber(ARGV[2])
if qty == nil or qty <= 0 then
    return redis.error_reply('quantity must be positive')
end
if redis.call('SADD', KEYS[3], ARGV[3]) == 0 then
    return 0
end
redis.call('INCRBY', KEYS[1], qty)
local bought = tonumber(redis.call('HGET', KEYS[2], ARGV[1]) or '0')
if bought - qty <= 0 then
    redis.call('HDEL', KEYS[2], ARGV[1])
else
    redis.call('HINCRBY', KEYS[2], ARGV[1], -qty)
end
return 1
";

/// Default key namespace.
pub const DEFAULT_KEY_PREFIX: &str = "flashsale";

fn stock_key(prefix: &str, sale_id: FlashsaleId) -> String {
    format!("{prefix}:{{{sale_id}}}:stock")
}

fn purchased_key(prefix: &str, sale_id: FlashsaleId) -> String {
    format!("{prefix}:{{{sale_id}}}:purchased")
}

fn reverted_key(prefix: &str, sale_id: FlashsaleId) -> String {
    format!("{prefix}:{{{sale_id}}}:reverted")
}

fn require_positive(quantity: i32) -> Result<(), LedgerError> {
    if quantity <= 0 {
        return Err(LedgerError::Script(format!(
            "Quantity must be positive, got {quantity}"
        )));
    }
    Ok(())
}

/// `Redis`-backed [`StockLedger`].
///
/// # Example
///
/// ```no_run
/// use flashsale_redis::RedisStockLedger;
/// use flashsale_core::ledger::StockLedger;
/// use flashsale_core::types::{FlashsaleId, OrderId, UserId};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = RedisStockLedger::new("redis://127.0.0.1:6379", "flashsale").await?;
/// ledger.warm(FlashsaleId::new(42), 100).await?;
/// let outcome = ledger.try_admit(FlashsaleId::new(42), UserId::new(7), 1, 2).await?;
/// assert!(outcome.is_admitted());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisStockLedger {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    key_prefix: String,
    admit_script: Script,
    revert_script: Script,
}

impl RedisStockLedger {
    /// Connect to `Redis`.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - `Redis` connection URL (e.g., "<redis://127.0.0.1:6379>")
    /// * `key_prefix` - namespace for all ledger keys
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Connection`] if connection to `Redis` fails.
    pub async fn new(redis_url: &str, key_prefix: impl Into<String>) -> Result<Self, LedgerError> {
        let client = Client::open(redis_url)
            .map_err(|e| LedgerError::Connection(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            LedgerError::Connection(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self::with_connection_manager(conn_manager, key_prefix))
    }

    /// Build a ledger over an existing connection manager.
    #[must_use]
    pub fn with_connection_manager(
        conn_manager: ConnectionManager,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            conn_manager,
            key_prefix: key_prefix.into(),
            admit_script: Script::new(ADMIT_SCRIPT),
            revert_script: Script::new(REVERT_SCRIPT),
        }
    }

    fn stock_key(&self, sale_id: FlashsaleId) -> String {
        stock_key(&self.key_prefix, sale_id)
    }

    fn purchased_key(&self, sale_id: FlashsaleId) -> String {
        purchased_key(&self.key_prefix, sale_id)
    }

    fn reverted_key(&self, sale_id: FlashsaleId) -> String {
        reverted_key(&self.key_prefix, sale_id)
    }

    /// Remove every ledger key of a sale.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Connection`] if the delete fails.
    pub async fn clear(&self, sale_id: FlashsaleId) -> Result<(), LedgerError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .del(vec![
                self.stock_key(sale_id),
                self.purchased_key(sale_id),
                self.reverted_key(sale_id),
            ])
            .await
            .map_err(|e| LedgerError::Connection(format!("Failed to clear ledger keys: {e}")))?;
        Ok(())
    }
}

impl StockLedger for RedisStockLedger {
    fn warm(&self, sale_id: FlashsaleId, total_stock: i32) -> BoxFuture<'_, Result<(), LedgerError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let _: () = conn
                .set(self.stock_key(sale_id), total_stock)
                .await
                .map_err(|e| LedgerError::Connection(format!("Failed to warm stock: {e}")))?;

            tracing::info!(
                flashsale_id = %sale_id,
                total_stock = total_stock,
                "Warmed ledger stock"
            );
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
            require_positive(quantity)?;
            let mut conn = self.conn_manager.clone();
            let code: i64 = self
                .admit_script
                .key(self.stock_key(sale_id))
                .key(self.purchased_key(sale_id))
                .arg(user_id.get())
                .arg(quantity)
                .arg(limit_per_user)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| LedgerError::Script(format!("Failed to execute admission: {e}")))?;

            match code {
                1 => Ok(AdmissionOutcome::Admitted),
                0 => Ok(AdmissionOutcome::SoldOut),
                2 => Ok(AdmissionOutcome::LimitExceeded),
                other => Err(LedgerError::Script(format!(
                    "Unexpected admission result: {other}"
                ))),
            }
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
            require_positive(quantity)?;
            let mut conn = self.conn_manager.clone();
            let code: i64 = self
                .revert_script
                .key(self.stock_key(sale_id))
                .key(self.purchased_key(sale_id))
                .key(self.reverted_key(sale_id))
                .arg(user_id.get())
                .arg(quantity)
                .arg(order_id.get())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| LedgerError::Script(format!("Failed to execute revert: {e}")))?;

            let applied = code == 1;
            tracing::debug!(
                flashsale_id = %sale_id,
                order_id = %order_id,
                user_id = %user_id,
                quantity = quantity,
                applied,
                "Reverted ledger admission"
            );
            Ok(applied)
        })
    }

    fn remaining(&self, sale_id: FlashsaleId) -> BoxFuture<'_, Result<i64, LedgerError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let stock: Option<i64> = conn
                .get(self.stock_key(sale_id))
                .await
                .map_err(|e| LedgerError::Connection(format!("Failed to read stock: {e}")))?;
            Ok(stock.unwrap_or(0))
        })
    }

    fn purchased(
        &self,
        sale_id: FlashsaleId,
        user_id: UserId,
    ) -> BoxFuture<'_, Result<i64, LedgerError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let bought: Option<i64> = conn
                .hget(self.purchased_key(sale_id), user_id.get())
                .await
                .map_err(|e| {
                    LedgerError::Connection(format!("Failed to read purchased count: {e}"))
                })?;
            Ok(bought.unwrap_or(0))
        })
    }
}
