//! Fleet Control Plane
//!
//! Places confidential-compute workloads on bare-metal nodes, admits them
//! against tenants' prepaid credits, and meters them until the credits run
//! out.

use std::sync::Arc;

use anyhow::Result;
use fleet_control_plane::{
    api,
    clients::{DnsZones, HttpAgentClient, LoggingDns},
    config::{self, StoreKind},
    db::{Database, MemoryStore, Store},
    metering::MeteringWorker,
    scheduler::RandomSelector,
    state::{AppState, AuthConfig},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to FLEET_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting fleet control plane");
    info!(listen_addr = %config.listen_addr, store = ?config.store, "Configuration loaded");

    let store: Arc<dyn Store> = match config.store {
        StoreKind::Memory => {
            warn!("Using in-memory store; state is lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreKind::Postgres => {
            let db = match Database::connect(&config.database).await {
                Ok(db) => {
                    info!("Database connection established");
                    db
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect to database");
                    return Err(e.into());
                }
            };

            // Run migrations in dev mode
            if config.dev_mode {
                info!("Running database migrations (dev mode)");
                if let Err(e) = db.run_migrations().await {
                    error!(error = %e, "Failed to run migrations");
                    return Err(e.into());
                }
            }
            Arc::new(db.store())
        }
    };

    let agent = Arc::new(HttpAgentClient::new(config.agent.clone())?);
    let dns = DnsZones::new(
        Arc::new(LoggingDns::new(config.workloads_zone.clone())),
        Arc::new(LoggingDns::new(config.nodes_zone.clone())),
    );

    // Create application state
    let state = AppState::new(
        store,
        agent,
        dns,
        Arc::new(RandomSelector),
        AuthConfig {
            admin_token: config.admin_token.clone(),
            agent_token: config.agent_token.clone(),
        },
        config.node_liveness,
    );

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start metering worker in background
    let metering_worker = MeteringWorker::new(state.metering().clone(), config.metering_interval);
    let metering_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            metering_worker.run(shutdown_rx).await;
        }
    });

    // Build and run the server
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    if let Err(e) = tokio::time::timeout(shutdown_timeout, metering_handle).await {
        warn!(error = %e, "Metering worker did not shut down in time");
    }

    info!("Control plane shutdown complete");
    Ok(())
}
