//! Configuration management for the flash-sale service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! `DATABASE_URL` is the only required variable.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Largest node id a snowflake id can carry (10 bits).
pub const MAX_NODE_ID: u16 = 1023;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set but out of range.
    #[error("Invalid value for {name}: {reason}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `PostgreSQL` configuration (definitions, orders, outbox)
    pub postgres: PostgresConfig,
    /// Redis configuration (stock ledger)
    pub redis: RedisConfig,
    /// Redpanda/Kafka configuration (relayed events)
    pub redpanda: RedpandaConfig,
    /// Risk service configuration
    pub risk: RiskConfig,
    /// Admission tuning
    pub admission: AdmissionConfig,
    /// Outbox relay configuration
    pub relay: RelayConfig,
    /// Process-level configuration
    pub server: ServerConfig,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// `PostgreSQL` connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Prefix of every ledger key
    pub key_prefix: String,
}

/// Redpanda/Kafka configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedpandaConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Producer acknowledgment mode: "0", "1" or "all"
    pub acks: String,
    /// Delivery timeout in milliseconds
    pub timeout_ms: u64,
}

/// Risk service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Base URL of the risk service
    pub base_url: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

/// Admission tuning.
///
/// Also used directly by [`OrderAdmissionOrchestrator`](crate::OrderAdmissionOrchestrator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// How long a cached definition is served before re-reading (1-9 s)
    pub snapshot_ttl: Duration,
    /// Bound on the durable order transaction
    pub commit_timeout: Duration,
    /// Bound on each ledger round trip
    pub ledger_timeout: Duration,
    /// Revert retries before a compensation is declared failed
    pub compensation_retries: usize,
    /// Risk levels strictly above this block the purchase (`RISK_BLOCK_THRESHOLD`)
    pub risk_block_threshold: i32,
    /// Snowflake node id of this process (0-1023)
    pub node_id: u16,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            snapshot_ttl: Duration::from_secs(3),
            commit_timeout: Duration::from_millis(2000),
            ledger_timeout: Duration::from_millis(500),
            compensation_retries: 3,
            risk_block_threshold: 80,
            node_id: 0,
        }
    }
}

impl AdmissionConfig {
    /// Range checks on the tunables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the snapshot TTL is outside 1-9
    /// seconds or the node id does not fit in 10 bits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ttl = self.snapshot_ttl;
        if ttl < Duration::from_secs(1) || ttl > Duration::from_secs(9) {
            return Err(ConfigError::Invalid {
                name: "SNAPSHOT_TTL_SECS",
                reason: format!("{}s is outside 1-9 seconds", ttl.as_secs()),
            });
        }
        if self.node_id > MAX_NODE_ID {
            return Err(ConfigError::Invalid {
                name: "NODE_ID",
                reason: format!("{} exceeds {MAX_NODE_ID}", self.node_id),
            });
        }
        Ok(())
    }
}

/// Outbox relay configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Rows claimed per round
    pub batch_size: i64,
    /// Pause between rounds that found nothing to do
    pub poll_interval: Duration,
    /// Failed deliveries before a row is parked
    pub max_attempts: i32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
            max_attempts: 10,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Prometheus listener address
    pub metrics_addr: String,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

fn parsed_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn string_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unparseable numeric values fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if `DATABASE_URL` is unset, or
    /// [`ConfigError::Invalid`] if an admission tunable is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            postgres: PostgresConfig {
                url: env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
                max_connections: parsed_or("DATABASE_MAX_CONNECTIONS", 10),
                connect_timeout: parsed_or("DATABASE_CONNECT_TIMEOUT", 30),
            },
            redis: RedisConfig {
                url: string_or("REDIS_URL", "redis://127.0.0.1:6379"),
                key_prefix: string_or("REDIS_KEY_PREFIX", flashsale_redis::DEFAULT_KEY_PREFIX),
            },
            redpanda: RedpandaConfig {
                brokers: string_or("REDPANDA_BROKERS", "localhost:9092"),
                acks: string_or("REDPANDA_ACKS", "all"),
                timeout_ms: parsed_or("REDPANDA_TIMEOUT_MS", 5000),
            },
            risk: RiskConfig {
                base_url: string_or("RISK_BASE_URL", "http://localhost:8081"),
                timeout_ms: parsed_or("RISK_TIMEOUT_MS", 200),
            },
            admission: AdmissionConfig {
                snapshot_ttl: Duration::from_secs(parsed_or("SNAPSHOT_TTL_SECS", 3)),
                commit_timeout: Duration::from_millis(parsed_or("COMMIT_TIMEOUT_MS", 2000)),
                ledger_timeout: Duration::from_millis(parsed_or("LEDGER_TIMEOUT_MS", 500)),
                compensation_retries: parsed_or("COMPENSATION_RETRIES", 3),
                risk_block_threshold: parsed_or("RISK_BLOCK_THRESHOLD", 80),
                node_id: parsed_or("NODE_ID", 0),
            },
            relay: RelayConfig {
                batch_size: parsed_or("OUTBOX_BATCH_SIZE", 100),
                poll_interval: Duration::from_millis(parsed_or("OUTBOX_POLL_INTERVAL_MS", 500)),
                max_attempts: parsed_or("OUTBOX_MAX_ATTEMPTS", 10),
            },
            server: ServerConfig {
                metrics_addr: string_or("METRICS_ADDR", "0.0.0.0:9090"),
                shutdown_timeout: parsed_or("SHUTDOWN_TIMEOUT_SECS", 10),
            },
        };

        config.admission.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_admission_config_is_valid() {
        assert_eq!(AdmissionConfig::default().validate(), Ok(()));
    }

    #[test]
    fn snapshot_ttl_must_stay_below_ten_seconds() {
        let config = AdmissionConfig {
            snapshot_ttl: Duration::from_secs(10),
            ..AdmissionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { name: "SNAPSHOT_TTL_SECS", .. })
        ));

        let zero = AdmissionConfig {
            snapshot_ttl: Duration::ZERO,
            ..AdmissionConfig::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn node_id_must_fit_ten_bits() {
        let config = AdmissionConfig {
            node_id: MAX_NODE_ID + 1,
            ..AdmissionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { name: "NODE_ID", .. })
        ));
    }
}
