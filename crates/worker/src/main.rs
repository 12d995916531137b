//! Courier worker binary entrypoint: consumes the email queues.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use courier_common::config::AppConfig;
use courier_email::{
    AuditStore, EmailTransport, FaultSink, LogFaultSink, LogTransport, PgFaultSink, email_endpoints,
};
use courier_messaging::{MemoryTopology, RabbitTopology, Topology};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("courier_worker=debug,courier_messaging=debug,courier_email=debug")
        }))
        .init();

    tracing::info!("Starting Courier worker...");

    let config = AppConfig::from_env()?;

    let audit = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            sqlx::migrate!("../../migrations").run(&pool).await?;
            tracing::info!("Audit database connected");
            Some(AuditStore::new(pool))
        }
        None => None,
    };

    let transport: Arc<dyn EmailTransport> = Arc::new(LogTransport);
    let sink: Arc<dyn FaultSink> = match &audit {
        Some(store) => Arc::new(PgFaultSink::new(store.clone())),
        None => {
            tracing::info!("No audit database configured; faults will only be logged");
            Arc::new(LogFaultSink)
        }
    };
    let endpoints = email_endpoints(&config.queues, transport, sink);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received; draining in-flight deliveries");
            let _ = shutdown_tx.send(true);
        }
    });

    if config.broker.enabled {
        let topology = RabbitTopology::connect(&config.broker).await?;
        for endpoint in endpoints {
            topology.declare(endpoint).await?;
        }
        topology.run(shutdown_rx).await?;
    } else {
        tracing::warn!("Broker disabled; running the in-process topology");
        let topology = MemoryTopology::new();
        for endpoint in endpoints {
            topology.declare(endpoint).await?;
        }
        topology.run(shutdown_rx).await?;
    }

    tracing::info!("Worker stopped");
    Ok(())
}
