//! Graceful shutdown handling.
//!
//! Shutdown runs in phases:
//! 1. Notify every connected client that the server is going away
//! 2. Signal sessions and background tasks to stop
//! 3. Wait for connections to unregister themselves
//! 4. Clear whatever is still registered

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::connection_manager::ConnectionManager;
use crate::websocket::{OutboundMessage, ServerMessage};

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for clients to be notified (default: 5 seconds)
    pub client_notification_timeout: Duration,
    /// Time to wait for connections to close on their own (default: 10 seconds)
    pub drain_timeout: Duration,
    /// Suggested reconnect delay to send to clients (default: 5 seconds)
    pub reconnect_after_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            client_notification_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(10),
            reconnect_after_seconds: 5,
        }
    }
}

pub struct GracefulShutdown {
    connection_manager: Arc<ConnectionManager>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(
        connection_manager: Arc<ConnectionManager>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self::with_config(connection_manager, shutdown_tx, ShutdownConfig::default())
    }

    pub fn with_config(
        connection_manager: Arc<ConnectionManager>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            connection_manager,
            shutdown_tx,
            config,
        }
    }

    /// Execute the shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.connection_manager.connection_count())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Notifying clients");
        result.clients_notified = self.notify_clients(reason).await;

        tracing::info!("Phase 2: Signaling sessions and background tasks to stop");
        // No receivers just means nothing is listening any more
        let _ = self.shutdown_tx.send(());

        tracing::info!("Phase 3: Waiting for connections to close");
        result.connections_closed = self.wait_for_connections_to_close().await;

        tracing::info!("Phase 4: Clearing registry");
        result.connections_cleared = self.connection_manager.clear();

        result.duration = start.elapsed();
        result.success = true;

        tracing::info!(
            clients_notified = result.clients_notified,
            connections_closed = result.connections_closed,
            connections_cleared = result.connections_cleared,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }

    async fn notify_clients(&self, reason: &str) -> usize {
        let connections = self.connection_manager.all_connections();
        let total = connections.len();

        if total == 0 {
            return 0;
        }

        tracing::info!(
            total_connections = total,
            "Sending shutdown notifications to clients"
        );

        let message = ServerMessage::shutdown(reason, Some(self.config.reconnect_after_seconds));
        let outbound = match OutboundMessage::preserialize(&message) {
            Ok(outbound) => outbound,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize shutdown notification");
                return 0;
            }
        };

        let mut futures: FuturesUnordered<_> = connections
            .into_iter()
            .map(|conn| {
                let outbound = outbound.clone();
                async move {
                    match conn.send_outbound(outbound).await {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::debug!(
                                connection_id = %conn.id,
                                error = %e,
                                "Failed to send shutdown notification"
                            );
                            false
                        }
                    }
                }
            })
            .collect();

        let mut notified = 0;
        let notify_future = async {
            while let Some(success) = futures.next().await {
                if success {
                    notified += 1;
                }
            }
        };

        if timeout(self.config.client_notification_timeout, notify_future)
            .await
            .is_err()
        {
            tracing::warn!("Timed out sending shutdown notifications");
        }

        tracing::info!(notified = notified, total = total, "Shutdown notifications sent");

        notified
    }

    async fn wait_for_connections_to_close(&self) -> usize {
        let initial = self.connection_manager.connection_count();
        if initial == 0 {
            return 0;
        }

        let wait_future = async {
            while self.connection_manager.connection_count() > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };

        let _ = timeout(self.config.drain_timeout, wait_future).await;

        let remaining = self.connection_manager.connection_count();
        if remaining > 0 {
            tracing::warn!(
                remaining_connections = remaining,
                "Some connections did not close gracefully"
            );
        }

        initial.saturating_sub(remaining)
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    pub success: bool,
    /// Clients that accepted the shutdown notice
    pub clients_notified: usize,
    /// Connections that unregistered on their own during the drain window
    pub connections_closed: usize,
    /// Connections still registered after the drain window and removed forcibly
    pub connections_cleared: usize,
    pub duration: Duration,
}
