//! Domain types for flash-sale admission.
//!
//! Prices are integers in the minor currency unit (cents). Quantities and stock
//! are `i32`, matching the durable schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw id.
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Get the raw id.
            #[must_use]
            pub const fn get(&self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a flash sale (the aggregate root).
    FlashsaleId
);
numeric_id!(
    /// Identifier of a buyer.
    UserId
);
numeric_id!(
    /// Identifier of an order created by admission.
    OrderId
);
numeric_id!(
    /// Catalogue product identifier.
    ProductId
);
numeric_id!(
    /// Catalogue SKU identifier.
    SkuId
);

// ============================================================================
// Flash sale definition
// ============================================================================

/// Lifecycle of a flash sale.
///
/// `Pending -> Ongoing -> Ended`, with `Canceled` reachable from any
/// non-terminal state. `Ended` and `Canceled` are terminal and stop admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashsaleStatus {
    /// Created, window not yet open
    Pending,
    /// Window open (may be driven externally or derived from the clock)
    Ongoing,
    /// Window closed
    Ended,
    /// Stopped by an operator
    Canceled,
}

impl FlashsaleStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ongoing => "ongoing",
            Self::Ended => "ended",
            Self::Canceled => "canceled",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "ongoing" => Some(Self::Ongoing),
            "ended" => Some(Self::Ended),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Returns `true` for states that permanently stop admission.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Canceled)
    }
}

impl fmt::Display for FlashsaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A flash sale as held in durable storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashsaleDefinition {
    /// Identity
    pub id: FlashsaleId,
    /// Display name
    pub name: String,
    /// Product on sale
    pub product_id: ProductId,
    /// SKU on sale
    pub sku_id: SkuId,
    /// List price (minor units)
    pub original_price: i64,
    /// Sale price (minor units)
    pub flash_price: i64,
    /// Units offered
    pub total_stock: i32,
    /// Maximum cumulative units per user (0 = unlimited)
    pub limit_per_user: i32,
    /// Units sold according to durable storage (never exceeds `total_stock`)
    pub sold_count: i32,
    /// Window start (inclusive)
    pub start_time: DateTime<Utc>,
    /// Window end (exclusive)
    pub end_time: DateTime<Utc>,
    /// Lifecycle status
    pub status: FlashsaleStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Input for creating a flash sale. The store assigns the id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFlashsale {
    /// Display name
    pub name: String,
    /// Product on sale
    pub product_id: ProductId,
    /// SKU on sale
    pub sku_id: SkuId,
    /// List price (minor units)
    pub original_price: i64,
    /// Sale price (minor units)
    pub flash_price: i64,
    /// Units offered
    pub total_stock: i32,
    /// Maximum cumulative units per user (0 = unlimited)
    pub limit_per_user: i32,
    /// Window start (inclusive)
    pub start_time: DateTime<Utc>,
    /// Window end (exclusive)
    pub end_time: DateTime<Utc>,
}

// ============================================================================
// Orders
// ============================================================================

/// Order lifecycle as far as admission is concerned.
///
/// `Pending --cancel--> Cancelled`; `Pending --> Paid` happens elsewhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created by admission, awaiting payment
    Pending,
    /// Paid (set by the payment flow)
    Paid,
    /// Cancelled before payment; stock has been returned
    Cancelled,
}

impl OrderStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An order produced by a successful admission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashsaleOrder {
    /// Identity (generated before the durable write)
    pub id: OrderId,
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
    /// Flash price per unit (minor units)
    pub unit_price: i64,
    /// `unit_price * quantity`
    pub total_amount: i64,
    /// Lifecycle status
    pub status: OrderStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl FlashsaleOrder {
    /// Build a pending order for an admitted request.
    #[must_use]
    pub fn pending(
        id: OrderId,
        sale: &FlashsaleDefinition,
        user_id: UserId,
        quantity: i32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            flashsale_id: sale.id,
            user_id,
            product_id: sale.product_id,
            sku_id: sale.sku_id,
            quantity,
            unit_price: sale.flash_price,
            total_amount: sale.flash_price.saturating_mul(i64::from(quantity)),
            status: OrderStatus::Pending,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_database_strings() {
        for status in [
            FlashsaleStatus::Pending,
            FlashsaleStatus::Ongoing,
            FlashsaleStatus::Ended,
            FlashsaleStatus::Canceled,
        ] {
            assert_eq!(FlashsaleStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("cancelled"), Some(OrderStatus::Cancelled));
        assert_eq!(OrderStatus::parse("refunded"), None);
    }

    #[test]
    fn ids_serialize_as_bare_numbers() {
        let json = serde_json::to_string(&OrderId::new(42)).unwrap_or_default();
        assert_eq!(json, "42");
    }
}
