//! Health check, system info, and statistics endpoints.

use std::collections::HashMap;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::connection_manager::FanoutStatsSnapshot;
use crate::metrics;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub components: HealthComponents,
}

#[derive(Debug, Serialize)]
pub struct HealthComponents {
    pub database: DatabaseHealth,
    pub websocket: WebSocketHealth,
    pub static_files: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DatabaseHealth {
    /// `connected`, `error`, or `disabled`
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct WebSocketHealth {
    pub total_connections: usize,
    pub active_groups: usize,
    pub unique_users: usize,
}

#[derive(Debug, Serialize)]
pub struct SystemInfoResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub features: HashMap<&'static str, bool>,
    pub endpoints: HashMap<&'static str, &'static str>,
    pub websocket_path: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: ConnectionStatsResponse,
    pub fanout: FanoutStatsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct ConnectionStatsResponse {
    pub total_connections: usize,
    pub unique_users: usize,
    pub groups: HashMap<String, usize>,
}

/// GET /health
///
/// A failing database degrades the status but never fails the request.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match &state.database {
        Some(db) => {
            let up = db.ping().await;
            metrics::DATABASE_UP.set(up as i64);
            if !up {
                tracing::warn!(backend = db.backend(), "Database health probe failed");
            }
            DatabaseHealth {
                status: if up { "connected" } else { "error" },
                backend: Some(db.backend()),
            }
        }
        None => DatabaseHealth {
            status: "disabled",
            backend: None,
        },
    };

    let status = if database.status == "error" {
        "degraded"
    } else {
        "healthy"
    };

    let conn_stats = state.connection_manager.stats();

    Json(HealthResponse {
        status,
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        components: HealthComponents {
            database,
            websocket: WebSocketHealth {
                total_connections: conn_stats.total_connections,
                active_groups: conn_stats.groups.len(),
                unique_users: conn_stats.unique_users,
            },
            static_files: "mounted",
        },
    })
}

/// GET /api/system/info
pub async fn system_info(State(state): State<AppState>) -> Json<SystemInfoResponse> {
    let features = HashMap::from([
        ("websocket", true),
        ("group_broadcast", true),
        ("direct_messages", true),
        ("database", state.database.is_some()),
        ("tracing", state.settings.otel.enabled),
    ]);

    let endpoints = HashMap::from([
        ("health", "/health"),
        ("stats", "/stats"),
        ("metrics", "/metrics"),
        ("system_info", "/api/system/info"),
        ("group_broadcast", "/api/v1/groups/{group}/broadcast"),
        ("group_connections", "/api/v1/groups/{group}/connections"),
        ("direct_send", "/api/v1/users/{user_id}/send"),
        ("static", "/static"),
        ("uploads", "/uploads"),
    ]);

    Json(SystemInfoResponse {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        features,
        endpoints,
        websocket_path: "/ws/{client_id}?user_id={user_id}",
        timestamp: Utc::now(),
    })
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let conn_stats = state.connection_manager.stats();

    Json(StatsResponse {
        connections: ConnectionStatsResponse {
            total_connections: conn_stats.total_connections,
            unique_users: conn_stats.unique_users,
            groups: conn_stats.groups,
        },
        fanout: state.connection_manager.fanout_stats(),
    })
}
