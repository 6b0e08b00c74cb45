//! # Flashsale Core
//!
//! Domain types, invariant checks and collaborator ports for the flash-sale
//! order-admission subsystem.
//!
//! This crate is pure: it performs no I/O. Everything that talks to the network
//! is expressed as a port (trait) here and implemented in a backend crate:
//!
//! | Port | Production implementation | Test double |
//! |------|---------------------------|-------------|
//! | [`ledger::StockLedger`] | `flashsale-redis` | `InMemoryStockLedger` |
//! | [`repository::FlashsaleRepository`] | `flashsale-postgres` | `InMemoryFlashsaleStore` |
//! | [`outbox::TransactionalOutbox`] | `flashsale-postgres` | `InMemoryFlashsaleStore` |
//! | [`publisher::EventPublisher`] | `flashsale-redpanda` | `InMemoryEventPublisher` |
//! | [`risk::RiskEvaluator`] | `HttpRiskClient` (service crate) | `MockRiskEvaluator` |
//!
//! ## Consistency model
//!
//! - The **ledger** is the only guard against oversell and over-limit purchases.
//!   Its admission is a single indivisible operation per sale.
//! - The **durable store** holds definitions and orders. An order row and its
//!   outbound event are written in one transaction (transactional outbox).
//! - If the durable write fails after a successful admission, the admission is
//!   reverted in the ledger (compensation).
//!
//! The [`flashsale`] module holds the advisory checks used outside the hot path.

#![forbid(unsafe_code)]

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use futures::future::BoxFuture;

pub mod environment;
pub mod error;
pub mod event;
pub mod flashsale;
pub mod ledger;
pub mod outbox;
pub mod publisher;
pub mod repository;
pub mod risk;
pub mod types;

pub use error::{FlashsaleError, LedgerError, OrderError, PublishError, RiskError, StoreError};
pub use types::{
    FlashsaleDefinition, FlashsaleId, FlashsaleOrder, FlashsaleStatus, NewFlashsale, OrderId,
    OrderStatus, ProductId, SkuId, UserId,
};
