//! Connection handle and related types

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use crate::websocket::{OutboundMessage, ServerMessage};

use super::ConnectionInfo;

/// Identifier of an authenticated user
pub type UserId = i64;

/// Handle for a single WebSocket connection.
///
/// The socket itself is owned by the connection task; the registry only
/// keeps this handle so it can enqueue messages for that task to write.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: Uuid,
    /// Caller-supplied group label (e.g. a browser tab session)
    pub group: String,
    pub user_id: Option<UserId>,
    sender: mpsc::Sender<OutboundMessage>,
    send_timeout: Duration,
    pub connected_at: DateTime<Utc>,
    /// Last activity timestamp (Unix seconds)
    last_activity: AtomicI64,
}

impl ConnectionHandle {
    pub fn new(
        group: impl Into<String>,
        user_id: Option<UserId>,
        sender: mpsc::Sender<OutboundMessage>,
        send_timeout: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            group: group.into(),
            user_id,
            sender,
            send_timeout,
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
        }
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            connection_id: self.id,
            group: self.group.clone(),
            user_id: self.user_id,
            connected_at: self.connected_at,
            last_activity: self.last_activity(),
        }
    }

    /// True once the connection's writer has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Send a ServerMessage (will be serialized when written to the socket)
    pub async fn send(&self, message: ServerMessage) -> Result<(), SendError> {
        self.send_outbound(OutboundMessage::Raw(message)).await
    }

    /// Enqueue an outbound message, waiting at most `send_timeout` for room
    /// in the connection's queue.
    pub async fn send_outbound(&self, message: OutboundMessage) -> Result<(), SendError> {
        match timeout(self.send_timeout, self.sender.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Closed),
            Err(_) => Err(SendError::Timeout),
        }
    }
}

/// Why a message could not be handed to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum SendError {
    #[error("connection closed")]
    Closed,
    #[error("outbound queue full")]
    Timeout,
}

/// Error returned when a registration is refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Total connection limit exceeded ({current}/{max})")]
    TotalLimitExceeded { current: usize, max: usize },
    #[error("User {user_id} already has an active connection")]
    UserAlreadyConnected { user_id: UserId },
}

/// What to do when a user registers a second connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateUserPolicy {
    /// The newest connection becomes the user's addressable connection;
    /// the older one stays open and reachable through its group.
    #[default]
    LastWins,
    /// Refuse the new connection while the existing one is still open
    RejectNew,
}

/// Limits for connection management
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    /// 0 disables the limit
    pub max_connections: usize,
    pub duplicate_user_policy: DuplicateUserPolicy,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_connections: 10000,
            duplicate_user_policy: DuplicateUserPolicy::LastWins,
        }
    }
}
