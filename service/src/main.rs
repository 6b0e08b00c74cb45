//! Flash-sale admission service.
//!
//! Wires Postgres, Redis, Redpanda and the risk service into the admission
//! orchestrator, then runs the outbox relay until Ctrl+C or SIGTERM.

use anyhow::Context;
use flashsale_core::environment::SystemClock;
use flashsale_postgres::PostgresFlashsaleStore;
use flashsale_redis::RedisStockLedger;
use flashsale_redpanda::RedpandaEventPublisher;
use flashsale_service::metrics::MetricsServer;
use flashsale_service::{
    Config, HttpRiskClient, OrderAdmissionOrchestrator, OutboxRelay, SnowflakeIdGenerator,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting flash-sale service");

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        redis_url = %config.redis.url,
        redpanda_brokers = %config.redpanda.brokers,
        risk_url = %config.risk.base_url,
        node_id = config.admission.node_id,
        "Configuration loaded"
    );

    let metrics_addr: SocketAddr = config
        .server
        .metrics_addr
        .parse()
        .with_context(|| format!("Invalid METRICS_ADDR {}", config.server.metrics_addr))?;
    MetricsServer::new(metrics_addr).start()?;

    info!("Connecting to Postgres...");
    let store = Arc::new(
        PostgresFlashsaleStore::connect(
            &config.postgres.url,
            config.postgres.max_connections,
            config.postgres.connect_timeout,
        )
        .await?,
    );
    store.migrate().await?;
    info!("Postgres connected and migrated");

    info!("Connecting to Redis...");
    let ledger =
        Arc::new(RedisStockLedger::new(&config.redis.url, config.redis.key_prefix.clone()).await?);
    info!("Redis ledger ready");

    let publisher = Arc::new(
        RedpandaEventPublisher::builder()
            .brokers(&config.redpanda.brokers)
            .producer_acks(&config.redpanda.acks)
            .timeout(Duration::from_millis(config.redpanda.timeout_ms))
            .build()?,
    );
    info!("Redpanda publisher ready");

    let risk = Arc::new(HttpRiskClient::new(
        &config.risk.base_url,
        Duration::from_millis(config.risk.timeout_ms),
    )?);

    let clock = Arc::new(SystemClock);
    let ids = Arc::new(SnowflakeIdGenerator::new(config.admission.node_id, clock.clone())?);

    let orchestrator = Arc::new(OrderAdmissionOrchestrator::new(
        ledger,
        store.clone(),
        store.clone(),
        risk,
        clock,
        ids,
        config.admission.clone(),
    ));

    let (relay, relay_shutdown) = OutboxRelay::new(store, publisher, config.relay.clone());
    let relay_handle = tokio::spawn(relay.run());

    let cache = Arc::clone(orchestrator.cache());
    let purge_interval = config.admission.snapshot_ttl;
    let purge_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(purge_interval);
        loop {
            ticker.tick().await;
            cache.purge_expired();
        }
    });

    info!("Flash-sale service running");
    shutdown_signal().await;

    purge_handle.abort();
    if relay_shutdown.send(true).is_err() {
        warn!("Outbox relay already stopped");
    }
    let grace = Duration::from_secs(config.server.shutdown_timeout);
    match tokio::time::timeout(grace, relay_handle).await {
        Ok(Ok(())) => info!("Outbox relay drained"),
        Ok(Err(e)) => error!(error = %e, "Outbox relay task failed"),
        Err(_) => warn!(timeout_secs = grace.as_secs(), "Outbox relay did not stop in time"),
    }

    info!("Flash-sale service stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "flashsale=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
