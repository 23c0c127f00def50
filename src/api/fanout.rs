//! Server-initiated fan-out endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection_manager::{BroadcastReport, UserId};
use crate::error::{AppError, Result};
use crate::server::AppState;
use crate::websocket::{is_valid_client_id, ServerMessage};

/// Body shared by the broadcast and direct-send endpoints
#[derive(Debug, Deserialize)]
pub struct FanoutRequest {
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub group: String,
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl From<BroadcastReport> for BroadcastResponse {
    fn from(report: BroadcastReport) -> Self {
        let failed = report.failed_count();
        Self {
            group: report.group,
            attempted: report.attempted,
            delivered: report.delivered,
            failed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub delivered: bool,
}

/// POST /api/v1/groups/{group}/broadcast
#[tracing::instrument(skip(state, request))]
pub async fn broadcast_to_group(
    State(state): State<AppState>,
    Path(group): Path<String>,
    Json(request): Json<FanoutRequest>,
) -> Result<Json<BroadcastResponse>> {
    if !is_valid_client_id(&group) {
        return Err(AppError::Validation(format!("Invalid group name: {group}")));
    }

    let message = ServerMessage::Broadcast {
        group: group.clone(),
        data: request.data,
    };
    let report = state.connection_manager.broadcast(&group, message).await;

    tracing::info!(
        group = %report.group,
        attempted = report.attempted,
        delivered = report.delivered,
        failed = report.failed_count(),
        "Group broadcast completed"
    );

    Ok(Json(report.into()))
}

/// POST /api/v1/users/{user_id}/send
#[tracing::instrument(skip(state, request))]
pub async fn send_to_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Json(request): Json<FanoutRequest>,
) -> Json<DeliveryResponse> {
    let delivered = state
        .connection_manager
        .send_to_user(user_id, ServerMessage::Direct { data: request.data })
        .await;

    if !delivered {
        tracing::debug!(user_id, "Direct message not delivered");
    }

    Json(DeliveryResponse { delivered })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::{DeliveryFailure, SendError};
    use uuid::Uuid;

    #[test]
    fn test_broadcast_response_counts_failures() {
        let report = BroadcastReport {
            group: "room".to_string(),
            attempted: 3,
            delivered: 1,
            failed: vec![
                DeliveryFailure {
                    connection_id: Uuid::new_v4(),
                    error: SendError::Closed,
                },
                DeliveryFailure {
                    connection_id: Uuid::new_v4(),
                    error: SendError::Timeout,
                },
            ],
        };

        let response = BroadcastResponse::from(report);
        assert_eq!(response.group, "room");
        assert_eq!(response.attempted, 3);
        assert_eq!(response.delivered, 1);
        assert_eq!(response.failed, 2);
    }
}
