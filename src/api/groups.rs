//! Read-only views of connection groups.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::connection_manager::ConnectionInfo;
use crate::error::{AppError, Result};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct GroupConnectionsResponse {
    pub group: String,
    pub connections: Vec<ConnectionInfo>,
}

/// GET /api/v1/groups/{group}/connections
pub async fn group_connections(
    State(state): State<AppState>,
    Path(group): Path<String>,
) -> Result<Json<GroupConnectionsResponse>> {
    let connections = state
        .connection_manager
        .group_connections(&group)
        .ok_or_else(|| AppError::NotFound(format!("Group {group} has no connections")))?;

    Ok(Json(GroupConnectionsResponse { group, connections }))
}
