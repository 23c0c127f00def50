//! Prometheus metrics endpoint.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::metrics;
use crate::server::AppState;

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    update_metrics_from_state(&state);

    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Refresh registry gauges before exposition
fn update_metrics_from_state(state: &AppState) {
    let conn_stats = state.connection_manager.stats();
    metrics::CONNECTIONS_TOTAL.set(conn_stats.total_connections as i64);
    metrics::USERS_CONNECTED.set(conn_stats.unique_users as i64);
    metrics::GROUPS_ACTIVE.set(conn_stats.groups.len() as i64);
}
