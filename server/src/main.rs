mod app;
mod config;
mod db_migrations;
mod db_sqlx;
mod engine;
mod error;
mod routes;
mod services;
mod state;

extern crate self as sqlx;
pub use crate::db_sqlx::{PgPool, postgres, query, query_as};

use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use crate::engine::{EngineParts, ReconciliationEngine};
use crate::services::ledger::{AchievementLedger, LocalLedger, PgLedger};
use crate::services::local_store::KeyValueStore;
use crate::services::photo_store::PhotoStore;
use crate::services::position_tracker::DeviceFeed;
use crate::services::route_service::DirectionsClient;
use crate::state::{AppState, build_http_client};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let http_client = match build_http_client() {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to build HTTP client");
            return;
        }
    };

    let source = config::spots_source();
    let spots =
        match services::spot_catalog::load(&source, &config::catalog_options(), &http_client).await
        {
            Ok(spots) => spots,
            Err(e) => {
                tracing::error!(error = %e, "failed to load spot catalog");
                return;
            }
        };

    // Remote ledger when a database is configured, local file otherwise.
    let (ledger, photos): (Arc<dyn AchievementLedger>, Arc<PhotoStore>) =
        match config::database_url() {
            Some(database_url) => {
                let pool =
                    match db_migrations::connect(&database_url, config::db_max_connections()).await
                    {
                        Ok(pool) => pool,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to prepare achievement database");
                            return;
                        }
                    };
                let ledger = match PgLedger::start(
                    pool,
                    config::ledger_poll_interval(),
                    config::broadcast_buffer(),
                )
                .await
                {
                    Ok(ledger) => ledger,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to read achievements");
                        return;
                    }
                };
                (Arc::new(ledger), Arc::new(PhotoStore::in_memory()))
            }
            None => {
                let path = config::local_store_path();
                tracing::warn!(
                    path = %path.display(),
                    "DATABASE_URL is not set; achievements are stored locally"
                );
                let store = match KeyValueStore::open(&path).await {
                    Ok(store) => Arc::new(store),
                    Err(e) => {
                        tracing::error!(error = %e, path = %path.display(), "failed to open local store");
                        return;
                    }
                };
                let ledger = LocalLedger::open(Arc::clone(&store), config::broadcast_buffer()).await;
                let photos = PhotoStore::load(store).await;
                (Arc::new(ledger), Arc::new(photos))
            }
        };

    let device = DeviceFeed::new(config::broadcast_buffer());
    let routes = DirectionsClient::new(
        http_client,
        config::directions_base_url(),
        config::mapbox_access_token(),
    );
    let engine = ReconciliationEngine::start(EngineParts {
        spots,
        sensors: Arc::new(device.clone()),
        ledger,
        routes: Arc::new(routes),
        photos,
        queue_capacity: config::engine_queue_capacity(),
        notice_buffer: config::notice_buffer(),
    });

    let state = AppState::new(engine.handle(), device);
    tokio::spawn(services::view_publisher::run(state.clone()));

    let static_dir = config::static_dir();
    let app = app::build_app(state, &static_dir);

    let addr = format!("0.0.0.0:{}", config::server_port());
    tracing::info!(static_dir = %static_dir.display(), "Spot walk server listening on {addr}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind TCP listener");
            engine.shutdown().await;
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server failed");
    }

    engine.shutdown().await;
    tracing::info!("Server shut down gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
