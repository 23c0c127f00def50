use axum::{
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;

use crate::error::AppError;
use crate::server::AppState;

use super::fanout::{broadcast_to_group, send_to_user};
use super::groups::group_connections;
use super::health::{health, stats, system_info};
use super::metrics::prometheus_metrics;

/// Upper bound on fan-out request bodies
const MAX_FANOUT_BODY_BYTES: usize = 1024 * 1024;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .route("/api/system/info", get(system_info))
        // Fan-out endpoints
        .nest(
            "/api/v1",
            Router::new()
                .route("/groups/{group}/broadcast", post(broadcast_to_group))
                .route("/groups/{group}/connections", get(group_connections))
                .route("/users/{user_id}/send", post(send_to_user))
                .layer(RequestBodyLimitLayer::new(MAX_FANOUT_BODY_BYTES)),
        )
}

/// Fallback for unmatched routes.
///
/// API paths get the JSON error envelope, everything else a bare 404.
pub async fn not_found(uri: Uri) -> Response {
    if is_api_path(uri.path()) {
        AppError::NotFound(format!("No route for {}", uri.path())).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

fn is_api_path(path: &str) -> bool {
    path == "/api" || path.starts_with("/api/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_api_path() {
        assert!(is_api_path("/api"));
        assert!(is_api_path("/api/v1/unknown"));
        assert!(!is_api_path("/apiary"));
        assert!(!is_api_path("/static/app.js"));
    }
}
