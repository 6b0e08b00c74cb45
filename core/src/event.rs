//! Outbound order events and outbox rows.
//!
//! Every committed order produces exactly one [`OrderCreatedEvent`] on
//! [`ORDER_CREATED_TOPIC`], keyed by the order id. Delivery is at-least-once,
//! so consumers treat `order_id` as the deduplication key.

use crate::error::StoreError;
use crate::types::{FlashsaleId, FlashsaleOrder, OrderId, ProductId, SkuId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Topic for order-created notifications.
pub const ORDER_CREATED_TOPIC: &str = "flashsale.order.created";

/// Payload published for every committed order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    /// Deduplication key for consumers
    pub order_id: OrderId,
    /// Sale the order belongs to
    pub flashsale_id: FlashsaleId,
    /// Buyer
    pub user_id: UserId,
    /// Product bought
    pub product_id: ProductId,
    /// SKU bought
    pub sku_id: SkuId,
    /// Units bought
    pub quantity: i32,
    /// Unit price in minor units
    pub price: i64,
    /// Order creation time (RFC 3339)
    pub created_at: DateTime<Utc>,
}

impl From<&FlashsaleOrder> for OrderCreatedEvent {
    fn from(order: &FlashsaleOrder) -> Self {
        Self {
            order_id: order.id,
            flashsale_id: order.flashsale_id,
            user_id: order.user_id,
            product_id: order.product_id,
            sku_id: order.sku_id,
            quantity: order.quantity,
            price: order.unit_price,
            created_at: order.created_at,
        }
    }
}

/// An event staged in the outbox, written in the same transaction as its order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxMessage {
    /// Destination topic
    pub topic: String,
    /// Partition/deduplication key
    pub key: String,
    /// Serialized payload (JSON)
    pub payload: Vec<u8>,
}

impl OutboxMessage {
    /// Stage the order-created notification for `order`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the payload cannot be encoded.
    pub fn order_created(order: &FlashsaleOrder) -> Result<Self, StoreError> {
        let payload = serde_json::to_vec(&OrderCreatedEvent::from(order))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self {
            topic: ORDER_CREATED_TOPIC.to_string(),
            key: order.id.to_string(),
            payload,
        })
    }
}

/// A pending outbox row claimed by the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxRecord {
    /// Row id
    pub id: i64,
    /// Staged message
    pub message: OutboxMessage,
    /// Failed delivery attempts so far
    pub attempts: i32,
    /// When the row was written
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::OrderStatus;
    use chrono::TimeZone;

    #[test]
    fn order_created_payload_uses_consumer_field_names() {
        let order = FlashsaleOrder {
            id: OrderId::new(7001),
            flashsale_id: FlashsaleId::new(1),
            user_id: UserId::new(7),
            product_id: ProductId::new(10),
            sku_id: SkuId::new(100),
            quantity: 2,
            unit_price: 9_900,
            total_amount: 19_800,
            status: OrderStatus::Pending,
            created_at: Utc.with_ymd_and_hms(2025, 11, 11, 0, 0, 5).unwrap(),
        };

        let message = OutboxMessage::order_created(&order).unwrap();
        assert_eq!(message.topic, ORDER_CREATED_TOPIC);
        assert_eq!(message.key, "7001");

        let json: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(json["order_id"], 7001);
        assert_eq!(json["flashsale_id"], 1);
        assert_eq!(json["quantity"], 2);
        assert_eq!(json["price"], 9_900);
        assert_eq!(json["created_at"], "2025-11-11T00:00:05Z");
    }
}
