//! # Flashsale Service
//!
//! The application layer of the flash-sale subsystem: it drives the ports
//! defined in `flashsale-core` and wires the production backends.
//!
//! - [`OrderAdmissionOrchestrator`]: `place_order` / `cancel_order` with
//!   fail-open risk, ledger admission, transactional outbox and compensation
//! - [`LocalSnapshotCache`]: per-process definition cache with a short TTL
//! - [`FlashsaleService`]: `create_flashsale`, `get_flashsale` and stock audits
//! - [`OutboxRelay`]: background delivery of outbox rows to the broker
//! - [`HttpRiskClient`]: JSON/HTTP risk evaluator
//! - [`SnowflakeIdGenerator`]: time-ordered order ids
//!
//! ## Example
//!
//! ```ignore
//! let orchestrator = Arc::new(OrderAdmissionOrchestrator::new(
//!     ledger,
//!     store.clone(),
//!     store.clone(),
//!     risk,
//!     clock,
//!     ids,
//!     AdmissionConfig::default(),
//! ));
//!
//! match orchestrator.place_order(user_id, sale_id, 1).await {
//!     Ok(order) => println!("order {} placed", order.id),
//!     Err(e) if e.is_rejection() => println!("refused: {}", e.reason()),
//!     Err(e) => return Err(e.into()),
//! }
//! ```

pub mod cache;
pub mod config;
pub mod id;
pub mod metrics;
pub mod orchestrator;
pub mod relay;
pub mod retry;
pub mod risk;
pub mod service;

pub use cache::LocalSnapshotCache;
pub use config::{AdmissionConfig, Config, ConfigError, RelayConfig};
pub use id::SnowflakeIdGenerator;
pub use orchestrator::OrderAdmissionOrchestrator;
pub use relay::{OutboxRelay, RelayRound};
pub use retry::RetryPolicy;
pub use risk::HttpRiskClient;
pub use service::{FlashsaleService, FlashsaleView, LookupError, StockAudit};
