use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;

use nexus_learn_backend::config::Settings;
use nexus_learn_backend::database::{DatabaseProbe, PostgresDatabase};
use nexus_learn_backend::server::{create_app, prepare_storage, AppState};
use nexus_learn_backend::shutdown::GracefulShutdown;
use nexus_learn_backend::tasks::HeartbeatTask;
use nexus_learn_backend::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new().context("failed to load configuration")?;

    // Initialize tracing; the guard flushes spans on exit
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    prepare_storage(&settings.storage).context("failed to create storage directories")?;

    // Optional database
    let database = match settings.database.url {
        Some(_) => {
            let db = PostgresDatabase::connect(&settings.database).await?;
            tracing::info!(url = %db.database_url_masked(), "Database connected");
            Some(db)
        }
        None => {
            tracing::info!("No database configured, running without one");
            None
        }
    };
    let probe = database
        .clone()
        .map(|db| Arc::new(db) as Arc<dyn DatabaseProbe>);

    // Create application state
    let state = AppState::new(settings.clone(), probe);
    tracing::info!("Application state initialized");

    // Start heartbeat task in background
    let heartbeat_task = HeartbeatTask::new(
        settings.websocket.clone(),
        state.connection_manager.clone(),
        state.shutdown.subscribe(),
    );
    let heartbeat_handle = tokio::spawn(async move {
        heartbeat_task.run().await;
    });

    let shutdown = GracefulShutdown::new(state.connection_manager.clone(), state.shutdown.clone());

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let reason = shutdown_signal().await;
            shutdown.execute(reason).await;
        })
        .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    let _ = heartbeat_handle.await;

    if let Some(db) = database {
        db.close().await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM with a reason to report to clients
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    "Server is shutting down"
}
