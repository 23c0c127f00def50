//! Integration tests for the HTTP surface
//!
//! Requests go straight through the router with `tower::ServiceExt::oneshot`;
//! no listener is bound.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use nexus_learn_backend::config::Settings;
use nexus_learn_backend::connection_manager::ConnectionHandle;
use nexus_learn_backend::database::DatabaseProbe;
use nexus_learn_backend::server::{create_app, AppState};
use nexus_learn_backend::websocket::OutboundMessage;

struct StubDatabase {
    up: bool,
}

#[async_trait]
impl DatabaseProbe for StubDatabase {
    async fn ping(&self) -> bool {
        self.up
    }

    fn backend(&self) -> &'static str {
        "stub"
    }
}

fn state_with(database: Option<Arc<dyn DatabaseProbe>>) -> AppState {
    AppState::new(Settings::default(), database)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn connect(state: &AppState, group: &str, user_id: Option<i64>) -> mpsc::Receiver<OutboundMessage> {
    let (tx, rx) = mpsc::channel(8);
    let handle = Arc::new(ConnectionHandle::new(
        group,
        user_id,
        tx,
        Duration::from_millis(100),
    ));
    state.connection_manager.register(&handle).unwrap();
    rx
}

// =============================================================================
// Health & info
// =============================================================================

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_without_database() {
        let state = state_with(None);
        let _rx = connect(&state, "tab", Some(1));

        let (status, body) = send(create_app(state), get("/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["components"]["database"]["status"], "disabled");
        assert_eq!(body["components"]["websocket"]["total_connections"], 1);
        assert_eq!(body["components"]["websocket"]["unique_users"], 1);
        assert_eq!(body["components"]["static_files"], "mounted");
        assert!(body["timestamp"].is_string());
        assert!(body["uptime_seconds"].is_u64());
    }

    #[tokio::test]
    async fn test_health_degraded_when_database_down() {
        let state = state_with(Some(Arc::new(StubDatabase { up: false })));

        let (status, body) = send(create_app(state), get("/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["components"]["database"]["status"], "error");
    }

    #[tokio::test]
    async fn test_health_with_database_up() {
        let state = state_with(Some(Arc::new(StubDatabase { up: true })));

        let (_, body) = send(create_app(state), get("/health")).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["components"]["database"]["status"], "connected");
        assert_eq!(body["components"]["database"]["backend"], "stub");
    }

    #[tokio::test]
    async fn test_system_info() {
        let (status, body) = send(create_app(state_with(None)), get("/api/system/info")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "nexus-learn-backend");
        assert_eq!(body["features"]["websocket"], true);
        assert_eq!(body["features"]["database"], false);
        assert_eq!(body["websocket_path"], "/ws/{client_id}?user_id={user_id}");
    }

    #[tokio::test]
    async fn test_stats_and_metrics() {
        let state = state_with(None);
        let _a = connect(&state, "room", None);
        let _b = connect(&state, "room", Some(2));

        let (status, body) = send(create_app(state.clone()), get("/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connections"]["total_connections"], 2);
        assert_eq!(body["connections"]["groups"]["room"], 2);
        assert_eq!(body["fanout"]["broadcasts"], 0);

        let response = create_app(state).oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("nexus_connections_total"));
    }
}

// =============================================================================
// Fan-out endpoints
// =============================================================================

mod fanout_tests {
    use super::*;

    #[tokio::test]
    async fn test_group_broadcast_endpoint() {
        let state = state_with(None);
        let mut rx_a = connect(&state, "room", None);
        let mut rx_b = connect(&state, "room", None);
        let mut rx_other = connect(&state, "lobby", None);

        let (status, body) = send(
            create_app(state),
            post_json("/api/v1/groups/room/broadcast", json!({"data": {"msg": "hi"}})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["group"], "room");
        assert_eq!(body["attempted"], 2);
        assert_eq!(body["delivered"], 2);
        assert_eq!(body["failed"], 0);

        for rx in [&mut rx_a, &mut rx_b] {
            let text = rx.try_recv().unwrap().to_json().unwrap();
            let msg: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(msg["type"], "broadcast");
            assert_eq!(msg["group"], "room");
            assert_eq!(msg["data"]["msg"], "hi");
        }
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_rejects_invalid_group() {
        let (status, body) = send(
            create_app(state_with(None)),
            post_json("/api/v1/groups/bad%20group/broadcast", json!({"data": 1})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_direct_send_endpoint() {
        let state = state_with(None);
        let mut rx = connect(&state, "tab", Some(77));

        let (status, body) = send(
            create_app(state.clone()),
            post_json("/api/v1/users/77/send", json!({"data": "ping"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["delivered"], true);

        let text = rx.try_recv().unwrap().to_json().unwrap();
        assert_eq!(text, r#"{"type":"direct","data":"ping"}"#);

        let (_, body) = send(
            create_app(state),
            post_json("/api/v1/users/78/send", json!({"data": "ping"})),
        )
        .await;
        assert_eq!(body["delivered"], false);
    }
}

// =============================================================================
// Group views
// =============================================================================

mod group_view_tests {
    use super::*;

    #[tokio::test]
    async fn test_group_connections_lists_members_with_activity() {
        let state = state_with(None);
        let _a = connect(&state, "room", Some(5));
        let _b = connect(&state, "room", None);

        let (status, body) = send(
            create_app(state),
            get("/api/v1/groups/room/connections"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["group"], "room");
        let connections = body["connections"].as_array().unwrap();
        assert_eq!(connections.len(), 2);
        for conn in connections {
            assert_eq!(conn["group"], "room");
            assert!(conn["last_activity"].is_string());
            assert!(conn["connected_at"].is_string());
        }
        assert!(connections.iter().any(|c| c["user_id"] == 5));
    }

    #[tokio::test]
    async fn test_group_connections_unknown_group_is_404() {
        let (status, body) = send(
            create_app(state_with(None)),
            get("/api/v1/groups/empty/connections"),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }
}

// =============================================================================
// Routing & middleware
// =============================================================================

mod routing_tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_api_route_returns_json_404() {
        let (status, body) = send(create_app(state_with(None)), get("/api/v1/nothing")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_unknown_page_returns_plain_404() {
        let (status, body) = send(create_app(state_with(None)), get("/nowhere")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn test_untrusted_host_rejected() {
        let mut settings = Settings::default();
        settings.server.allowed_hosts = vec!["nexus.example.com".to_string()];
        let state = AppState::new(settings, None);

        let request = Request::builder()
            .uri("/health")
            .header(header::HOST, "evil.example.org")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(create_app(state.clone()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_HOST");

        let request = Request::builder()
            .uri("/health")
            .header(header::HOST, "nexus.example.com:8000")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(create_app(state), request).await;
        assert_eq!(status, StatusCode::OK);
    }
}
