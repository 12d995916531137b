//! Courier API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use courier_cache::CacheService;
use courier_common::config::AppConfig;
use courier_email::{
    AuditStore, EmailTransport, FaultSink, LogFaultSink, LogTransport, PgFaultSink, email_endpoints,
};
use courier_messaging::{EventBus, MemoryTopology, RabbitTopology, Topology};

use courier_api::routes::create_router;
use courier_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("courier_api=debug,courier_messaging=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Courier API server...");

    let config = AppConfig::from_env()?;

    let audit = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            sqlx::migrate!("../../migrations").run(&pool).await?;
            tracing::info!("Audit database connected");
            Some(AuditStore::new(pool))
        }
        None => {
            tracing::info!("No audit database configured; jobs will not be persisted");
            None
        }
    };

    let cache = Arc::new(CacheService::from_config(config.cache.clone()).await);

    // Keep the sender alive for the process lifetime; dropping it would
    // stop the in-process consume loops.
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let bus: Arc<dyn EventBus> = if config.broker.enabled {
        Arc::new(RabbitTopology::connect(&config.broker).await?)
    } else {
        // Degraded mode: no broker, so the API host consumes its own queues
        // in-process.
        tracing::warn!("Broker disabled; running the in-process topology");
        let topology = MemoryTopology::new();

        let transport: Arc<dyn EmailTransport> = Arc::new(LogTransport);
        let sink: Arc<dyn FaultSink> = match &audit {
            Some(store) => Arc::new(PgFaultSink::new(store.clone())),
            None => Arc::new(LogFaultSink),
        };
        for endpoint in email_endpoints(&config.queues, transport, sink) {
            topology.declare(endpoint).await?;
        }

        let runner = topology.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(err) = runner.run(shutdown).await {
                tracing::error!(error = %err, "In-process topology stopped");
            }
        });

        Arc::new(topology)
    };

    let state = AppState::new(bus, cache, audit, config);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
