//! Fleet control plane
//!
//! Serves desired state to regional cluster agents over gRPC and records the
//! status they report back.

use std::sync::Arc;

use anyhow::Result;
use fleet_control_plane::{
    api,
    config::{self, StoreBackend},
    db::Database,
    grpc::{self, Authenticator},
    state::AppState,
    store::{MemoryStore, PostgresStore, ResourceStore},
    sync::{shutdown_signalled, LiveRegistry, LiveRelay},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to FLEET_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting fleet control plane");
    info!(
        listen_addr = %config.listen_addr,
        grpc_listen_addr = %config.grpc_listen_addr,
        store = ?config.store,
        "Configuration loaded"
    );

    let store: Arc<dyn ResourceStore> = match config.store {
        StoreBackend::Postgres => {
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

            if config.dev_mode {
                info!("Running database migrations (dev mode)");
                if let Err(e) = db.run_migrations().await {
                    error!(error = %e, "Failed to run migrations");
                    return Err(e.into());
                }
            }

            let retry = config.database.retry_policy();
            Arc::new(PostgresStore::new(db, retry))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; state is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let registry = LiveRegistry::new();
    let state = AppState::new(
        Arc::clone(&store),
        registry.clone(),
        config.sync,
        shutdown_rx.clone(),
    );

    // Fan change-log entries out to live streams
    let relay = LiveRelay::new(Arc::clone(&store), registry, config.sync);
    let relay_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { relay.run(shutdown_rx).await }
    });

    let authenticator = Authenticator::new(&config.auth_token);
    let grpc_addr = config.grpc_listen_addr;
    let grpc_handle = tokio::spawn({
        let state = state.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        async move {
            info!(addr = %grpc_addr, "gRPC listening");
            tonic::transport::Server::builder()
                .add_service(grpc::cluster_service(state, authenticator))
                .serve_with_shutdown(grpc_addr, async move {
                    shutdown_signalled(&mut shutdown_rx).await;
                    info!("gRPC server shutting down");
                })
                .await
        }
    });

    let app = api::create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "HTTP listening");

    let http_handle = tokio::spawn({
        let mut shutdown_rx = shutdown_rx;
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_signalled(&mut shutdown_rx).await;
                    info!("HTTP server shutting down");
                })
                .await
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = grpc_handle => {
            match result {
                Ok(Ok(())) => info!("gRPC server exited"),
                Ok(Err(e)) => error!(error = %e, "gRPC server error"),
                Err(e) => error!(error = %e, "gRPC server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for tasks to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    if let Err(e) = tokio::time::timeout(shutdown_timeout, http_handle).await {
        warn!(error = %e, "HTTP server did not shut down in time");
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, relay_handle).await {
        warn!(error = %e, "Live relay did not shut down in time");
    }

    info!("Control plane shutdown complete");
    Ok(())
}
