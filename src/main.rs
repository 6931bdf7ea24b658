//! Courier message-delivery service.
//!
//! Main entry point. Wires configuration, the PostgreSQL pool and
//! migrations, both broker engines, the dispatch worker pool, and the
//! REST API together, and coordinates graceful shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use courier_api::{AppState, Config};
use courier_broker::{PostgresBrokerStorage, QueueEngine, TopicEngine};
use courier_core::{storage::Storage, RealClock};
use courier_delivery::{Dispatcher, PostgresDeliveryStorage};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting courier message-delivery service");

    let config = Config::load()?;
    info!(
        database_url = %config.database_url_masked(),
        host = %config.host,
        port = config.port,
        worker_pool_size = config.worker_pool_size,
        "configuration loaded"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    info!("database connection pool established");

    sqlx::migrate!("./migrations").run(&pool).await.context("failed to run migrations")?;
    info!("database migrations completed");

    let clock = Arc::new(RealClock::new());
    let storage = Arc::new(Storage::new(pool.clone()));

    let broker_storage = Arc::new(PostgresBrokerStorage::new(storage.clone()));
    let queues = Arc::new(QueueEngine::new(broker_storage.clone(), clock.clone()));
    let topics = Arc::new(TopicEngine::new(broker_storage, clock.clone()));

    let reaper_token = if config.reaper_interval_seconds > 0 {
        Some(queues.spawn_reaper(Duration::from_secs(config.reaper_interval_seconds)))
    } else {
        None
    };

    let mut dispatcher = Dispatcher::new(
        Arc::new(PostgresDeliveryStorage::new(storage)),
        config.to_dispatch_config(),
        clock,
    )?;
    dispatcher.start().await?;

    let addr = config.parse_server_addr()?;
    let request_timeout = Duration::from_secs(config.request_timeout);
    let state = AppState::new(queues, topics);
    let server = tokio::spawn(async move {
        if let Err(e) = courier_api::serve(state, addr, request_timeout, shutdown_signal()).await {
            error!(error = %e, "API server failed");
        }
    });

    info!(addr = %addr, "courier is ready");

    server.await.context("server task failed")?;
    info!("shutdown signal received, stopping background work");

    if let Some(token) = reaper_token {
        token.cancel();
    }

    if let Err(e) = dispatcher.shutdown().await {
        error!(error = %e, "dispatch engine shutdown incomplete");
    }

    pool.close().await;
    info!("courier shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,courier=debug,tower_http=debug"))
        .expect("invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Resolves when SIGTERM or ctrl-c arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
