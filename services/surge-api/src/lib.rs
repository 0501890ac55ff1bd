//! REST control surface for the Surge load-testing service.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod report;
pub mod rest;
pub mod state;
pub mod telemetry;

pub use config::Config;
pub use rest::build_router;
pub use state::AppState;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use surge_core::{CoreError, CoreResult, RunStore, SampleStore};
use surge_engine::RunService;
use surge_store::{create_sqlite_pool, run_migrations, SampleSink, SqliteRunStore, SqliteSampleStore};

/// Boots the full stack: storage, engine, and the HTTP listener. Returns
/// once graceful shutdown has finished.
///
/// # Errors
///
/// Storage initialization and bind failures abort startup.
pub async fn run_server(config: Config) -> CoreResult<()> {
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = create_sqlite_pool(&config.database_url(), config.database.max_connections)
        .await
        .map_err(|err| CoreError::Storage(format!("failed to open database: {err}")))?;
    run_migrations(&pool)
        .await
        .map_err(|err| CoreError::Storage(format!("failed to run migrations: {err}")))?;
    info!(path = %config.database.path, "database ready");

    let runs: Arc<dyn RunStore> = Arc::new(SqliteRunStore::new(pool.clone()));
    let samples: Arc<dyn SampleStore> = Arc::new(SqliteSampleStore::new(pool));
    let (sink, _sink_writer) = SampleSink::spawn(Arc::clone(&samples));

    let service = RunService::new(runs, samples, sink)?;
    let state = AppState::new(Arc::clone(&service));
    let app = build_router(state);

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    let addr: SocketAddr = bind_address
        .parse()
        .map_err(|err| CoreError::internal(format!("invalid bind address `{bind_address}`: {err}")))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| CoreError::internal(format!("failed to bind to {addr}: {err}")))?;
    info!(%addr, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|err| CoreError::internal(format!("server error: {err}")))?;

    // The listener is closed; cancel whatever is still load-testing and
    // finalize before exiting.
    service.shutdown().await;
    info!("server shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received CTRL+C, initiating graceful shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating graceful shutdown");
        }
    }
}
