//! Per-connection message loop.
//!
//! A [`Session`] owns one connection from registration to teardown:
//!
//! ```text
//! Connecting --register--> Open --disconnect / error / idle / shutdown--> Closing --unregister--> Closed
//! ```
//!
//! Inbound frames are handled strictly one at a time, so replies leave in the
//! order their requests arrived.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::timeout;

use crate::connection_manager::{
    ConnectionError, ConnectionHandle, ConnectionManager, Registration, SendError,
};
use crate::metrics::WsMessageMetrics;

use super::message::{ClientMessage, ServerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a close frame
    ClientClosed,
    /// Inbound stream ended without a close frame
    StreamEnded,
    TransportError,
    ReplyFailed,
    IdleTimeout,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::StreamEnded => "stream_ended",
            Self::TransportError => "transport_error",
            Self::ReplyFailed => "reply_failed",
            Self::IdleTimeout => "idle_timeout",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Errors raised while handling a single inbound frame
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Malformed message; the connection stays usable
    #[error("invalid message: {0}")]
    Decode(#[from] serde_json::Error),
    /// The socket itself failed
    #[error("transport error: {0}")]
    Transport(String),
    /// The reply could not be queued for the writer
    #[error("reply failed: {0}")]
    Reply(#[from] SendError),
}

impl SessionError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

enum Flow {
    Continue,
    Close,
}

pub struct Session {
    registration: Registration,
    idle_timeout: Duration,
    shutdown: Option<broadcast::Receiver<()>>,
    state: SessionState,
}

impl Session {
    /// Register the connection and open the session
    pub fn start(
        registry: Arc<ConnectionManager>,
        handle: Arc<ConnectionHandle>,
        idle_timeout: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self, ConnectionError> {
        let registration = Registration::acquire(registry, handle)?;
        let mut session = Self {
            registration,
            idle_timeout,
            shutdown: Some(shutdown),
            state: SessionState::Connecting,
        };
        session.transition(SessionState::Open);
        Ok(session)
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        self.registration.handle()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until the connection ends, then unregister it
    pub async fn run<S, E>(mut self, mut inbound: S) -> CloseReason
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let idle_timeout = self.idle_timeout;

        let reason = loop {
            let next = tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown) => break CloseReason::Shutdown,
                next = timeout(idle_timeout, inbound.next()) => next,
            };

            let frame = match next {
                Err(_) => break CloseReason::IdleTimeout,
                Ok(None) => break CloseReason::StreamEnded,
                Ok(Some(Err(e))) => {
                    let error = SessionError::Transport(e.to_string());
                    tracing::warn!(
                        connection_id = %self.handle().id,
                        error = %error,
                        "WebSocket receive error"
                    );
                    break CloseReason::TransportError;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match self.handle_frame(frame).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => break CloseReason::ClientClosed,
                Err(error) if error.is_recoverable() => {
                    tracing::warn!(
                        connection_id = %self.handle().id,
                        error = %error,
                        "Failed to parse client message"
                    );
                    WsMessageMetrics::record("invalid");
                    let reply = ServerMessage::error("INVALID_MESSAGE", error.to_string());
                    if self.handle().send(reply).await.is_err() {
                        break CloseReason::ReplyFailed;
                    }
                }
                Err(error) => {
                    tracing::debug!(
                        connection_id = %self.handle().id,
                        error = %error,
                        "Closing connection"
                    );
                    break CloseReason::ReplyFailed;
                }
            }
        };

        self.close(reason);
        reason
    }

    async fn handle_frame(&self, frame: Message) -> Result<Flow, SessionError> {
        let handle = self.handle();
        match frame {
            Message::Text(text) => {
                handle.update_activity();
                let msg: ClientMessage = serde_json::from_str(text.as_str())?;
                WsMessageMetrics::record(msg.kind());
                handle.send(ServerMessage::reply_to(msg)).await?;
                Ok(Flow::Continue)
            }
            Message::Binary(_) => {
                handle.update_activity();
                WsMessageMetrics::record("binary");
                handle
                    .send(ServerMessage::error(
                        "UNSUPPORTED_FORMAT",
                        "Binary messages are not supported",
                    ))
                    .await?;
                Ok(Flow::Continue)
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Axum answers pings itself; these only count as activity
                handle.update_activity();
                Ok(Flow::Continue)
            }
            Message::Close(_) => {
                tracing::debug!(connection_id = %handle.id, "Received close frame");
                Ok(Flow::Close)
            }
        }
    }

    fn close(mut self, reason: CloseReason) {
        self.transition(SessionState::Closing);
        tracing::debug!(
            connection_id = %self.handle().id,
            reason = reason.as_str(),
            "Closing session"
        );

        let Session { registration, .. } = self;
        registration.release();
        tracing::trace!(state = ?SessionState::Closed, "Session closed");
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(
            connection_id = %self.handle().id,
            from = ?self.state,
            to = ?next,
            "Session state change"
        );
        self.state = next;
    }
}

/// Resolves when the process-wide shutdown signal fires. A dropped sender
/// means shutdown can no longer be signalled, so the future then never resolves.
async fn wait_for_shutdown(shutdown: &mut Option<broadcast::Receiver<()>>) {
    let closed = match shutdown.as_mut() {
        Some(rx) => matches!(rx.recv().await, Err(RecvError::Closed)),
        None => true,
    };

    if closed {
        *shutdown = None;
        std::future::pending::<()>().await;
    }
}
