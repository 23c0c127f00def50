use std::path::Path;

use axum::{middleware, routing::get, Router};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::api::{api_routes, not_found};
use crate::config::StorageConfig;
use crate::websocket::ws_handler;

use super::middleware::{cors_layer, trusted_host};
use super::AppState;

pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.server);
    let storage = &state.settings.storage;

    Router::new()
        // WebSocket endpoint
        .route("/ws/{client_id}", get(ws_handler))
        // Merge API routes
        .merge(api_routes())
        // Static mounts
        .nest_service("/static", ServeDir::new(&storage.static_dir))
        .nest_service("/uploads", ServeDir::new(&storage.uploads_dir))
        .fallback(not_found)
        // Add middleware
        .layer(middleware::from_fn_with_state(state.clone(), trusted_host))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Add state
        .with_state(state)
}

/// Create the static, uploads, and temp directories if they are missing
pub fn prepare_storage(storage: &StorageConfig) -> std::io::Result<()> {
    for dir in [&storage.static_dir, &storage.uploads_dir, &storage.temp_dir] {
        let path = Path::new(dir);
        if !path.exists() {
            std::fs::create_dir_all(path)?;
            tracing::info!(path = %dir, "Created storage directory");
        }
    }
    Ok(())
}
