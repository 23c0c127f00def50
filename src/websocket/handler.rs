use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::connection_manager::{ConnectionHandle, UserId};
use crate::metrics::{
    SessionMetrics, WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION,
};
use crate::server::AppState;

use super::message::{OutboundMessage, ServerMessage};
use super::session::{CloseReason, Session};

/// How long the writer may keep flushing queued replies after the session ends
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const MAX_CLIENT_ID_LEN: usize = 128;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: Option<UserId>,
}

/// WebSocket upgrade handler for `/ws/{client_id}`
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query),
    fields(user_id = ?query.user_id)
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Query(query): Query<WsQuery>,
) -> Response {
    if !is_valid_client_id(&client_id) {
        tracing::warn!(client_id = %client_id, "Rejected WebSocket upgrade with invalid client id");
        return (StatusCode::BAD_REQUEST, "Invalid client id").into_response();
    }

    tracing::info!(client_id = %client_id, "WebSocket upgrade requested");

    ws.on_upgrade(move |socket| handle_socket(socket, state, client_id, query.user_id))
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state),
    fields(otel.kind = "server")
)]
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    group: String,
    user_id: Option<UserId>,
) {
    let ws_config = &state.settings.websocket;
    let connection_start = std::time::Instant::now();

    // Create channel for sending messages to this connection
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(ws_config.channel_buffer);
    let handle = Arc::new(ConnectionHandle::new(
        group,
        user_id,
        tx,
        ws_config.send_timeout(),
    ));
    let connection_id = handle.id;

    let (mut ws_sender, ws_receiver) = socket.split();

    let session = match Session::start(
        state.connection_manager.clone(),
        handle.clone(),
        ws_config.idle_timeout(),
        state.shutdown.subscribe(),
    ) {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(connection_id = %connection_id, error = %e, "Connection rejected");
            let error_msg = ServerMessage::error("CONNECTION_REJECTED", e.to_string());
            if let Ok(json) = serde_json::to_string(&error_msg) {
                let _ = ws_sender.send(Message::Text(json.into())).await;
            }
            let _ = ws_sender.close().await;
            return;
        }
    };

    WS_CONNECTIONS_OPENED.inc();
    tracing::info!(
        connection_id = %connection_id,
        group = %handle.group,
        user_id = ?handle.user_id,
        "WebSocket connection established"
    );

    // Task for writing queued messages to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            // Pre-serialized messages avoid the serialization cost here
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        let _ = ws_sender.close().await;
    });

    let outcome = tokio::select! {
        reason = session.run(ws_receiver) => Some(reason),
        _ = &mut send_task => None,
    };

    // The writer ends once every sender for this connection is gone
    drop(handle);

    let reason = match outcome {
        Some(reason) => {
            if timeout(WRITER_DRAIN_TIMEOUT, &mut send_task).await.is_err() {
                tracing::debug!(connection_id = %connection_id, "Writer did not drain in time");
                send_task.abort();
            }
            reason
        }
        None => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
            CloseReason::TransportError
        }
    };

    WS_CONNECTIONS_CLOSED.inc();
    SessionMetrics::record_close(reason);
    let duration = connection_start.elapsed().as_secs_f64();
    WS_CONNECTION_DURATION.observe(duration);

    tracing::info!(
        connection_id = %connection_id,
        reason = reason.as_str(),
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Validate a caller-supplied client (group) id
pub fn is_valid_client_id(id: &str) -> bool {
    if id.is_empty() || id.len() > MAX_CLIENT_ID_LEN {
        return false;
    }

    // Only allow alphanumeric, dash, underscore, and dot
    id.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}
