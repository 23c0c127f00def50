use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::broadcast;

use crate::config::WebSocketConfig;
use crate::connection_manager::{ConnectionManager, SendError};
use crate::metrics::HeartbeatMetrics;
use crate::websocket::{OutboundMessage, ServerMessage};

/// Maximum concurrent heartbeat sends to avoid overwhelming the system
const MAX_CONCURRENT_HEARTBEATS: usize = 1000;

/// Background task that keeps idle connections alive with an outbound heartbeat
pub struct HeartbeatTask {
    config: WebSocketConfig,
    connection_manager: Arc<ConnectionManager>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        connection_manager: Arc<ConnectionManager>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            connection_manager,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval.max(1));
        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = heartbeat_interval.as_secs(),
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    self.send_heartbeats().await;
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// Send one heartbeat to every registered connection, in batches
    async fn send_heartbeats(&self) {
        let connections = self.connection_manager.all_connections();
        let total_count = connections.len();

        if total_count == 0 {
            return;
        }

        let outbound = match OutboundMessage::preserialize(&ServerMessage::Heartbeat) {
            Ok(outbound) => outbound,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize heartbeat");
                return;
            }
        };

        let start = Instant::now();
        let sent = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let timed_out = AtomicUsize::new(0);

        for batch in connections.chunks(MAX_CONCURRENT_HEARTBEATS) {
            let futures = batch.iter().map(|handle| {
                let outbound = outbound.clone();
                let (sent, failed, timed_out) = (&sent, &failed, &timed_out);

                async move {
                    match handle.send_outbound(outbound).await {
                        Ok(()) => {
                            sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(SendError::Closed) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(
                                connection_id = %handle.id,
                                "Failed to send heartbeat, connection is closing"
                            );
                        }
                        Err(SendError::Timeout) => {
                            timed_out.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(
                                connection_id = %handle.id,
                                "Heartbeat send timed out"
                            );
                        }
                    }
                }
            });

            join_all(futures).await;
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let timed_out_count = timed_out.load(Ordering::Relaxed);

        HeartbeatMetrics::record_duration_ms(elapsed_ms);
        if timed_out_count > 0 {
            HeartbeatMetrics::record_timeouts(timed_out_count as u64);
        }

        tracing::debug!(
            total = total_count,
            sent = sent.load(Ordering::Relaxed),
            failed = failed.load(Ordering::Relaxed),
            timed_out = timed_out_count,
            elapsed_ms = elapsed_ms,
            "Heartbeat round completed"
        );

        if elapsed_ms > (self.config.heartbeat_interval * 1000 / 2) {
            tracing::warn!(
                elapsed_ms = elapsed_ms,
                heartbeat_interval_ms = self.config.heartbeat_interval * 1000,
                connections = total_count,
                "Heartbeat round took more than 50% of interval"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::ConnectionHandle;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_heartbeat_task_shutdown() {
        let config = WebSocketConfig::default();
        let connection_manager = Arc::new(ConnectionManager::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = HeartbeatTask::new(config, connection_manager, shutdown_rx);

        let handle = tokio::spawn(async move {
            task.run().await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }

    #[tokio::test]
    async fn test_heartbeat_sends_to_connections() {
        let config = WebSocketConfig {
            heartbeat_interval: 1,
            ..Default::default()
        };
        let connection_manager = Arc::new(ConnectionManager::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let (tx, mut rx) = mpsc::channel::<OutboundMessage>(10);
        let handle = Arc::new(ConnectionHandle::new(
            "tab-1",
            Some(7),
            tx,
            Duration::from_millis(100),
        ));
        connection_manager.register(&handle).unwrap();

        let task = HeartbeatTask::new(config, connection_manager, shutdown_rx);
        let task_handle = tokio::spawn(async move {
            task.run().await;
        });

        let msg = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("Should receive heartbeat")
            .expect("Channel should not be closed");

        assert_eq!(msg.to_json().unwrap(), r#"{"type":"heartbeat"}"#);

        shutdown_tx.send(()).unwrap();
        let _ = task_handle.await;
    }
}
