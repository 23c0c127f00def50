use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use uuid::Uuid;

use crate::metrics::FanoutMetrics;
use crate::websocket::{OutboundMessage, ServerMessage};

use super::{
    BroadcastReport, ConnectionError, ConnectionHandle, ConnectionInfo, ConnectionLimits,
    ConnectionStats, DeliveryFailure, DuplicateUserPolicy, FanoutStats, FanoutStatsSnapshot,
    GroupInfo, UserId,
};

/// Registry of live WebSocket connections.
///
/// Tracks every connection under its group and, for connections opened on
/// behalf of a user, the single connection currently addressable for that
/// user. All operations take `&self` and are safe to call from any number of
/// connection tasks at once.
pub struct ConnectionManager {
    /// group -> connection_id -> handle (never holds an empty map)
    groups: DashMap<String, HashMap<Uuid, Arc<ConnectionHandle>>>,
    /// user_id -> most recently registered connection
    by_user: DashMap<UserId, Arc<ConnectionHandle>>,
    /// Number of distinct registered connections
    total: AtomicUsize,
    limits: ConnectionLimits,
    fanout: FanoutStats,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::with_limits(ConnectionLimits::default())
    }

    pub fn with_limits(limits: ConnectionLimits) -> Self {
        Self {
            groups: DashMap::new(),
            by_user: DashMap::new(),
            total: AtomicUsize::new(0),
            limits,
            fanout: FanoutStats::default(),
        }
    }

    pub fn limits(&self) -> &ConnectionLimits {
        &self.limits
    }

    /// Register a connection under its group and, if it carries one, its user.
    ///
    /// Registering a connection that is already present is a no-op.
    pub fn register(&self, handle: &Arc<ConnectionHandle>) -> Result<(), ConnectionError> {
        if self.contains(handle) {
            return Ok(());
        }

        self.reserve_slot()?;

        if let Some(user_id) = handle.user_id {
            if let Err(e) = self.index_user(user_id, handle) {
                self.release_slot();
                return Err(e);
            }
        }

        let previous = self
            .groups
            .entry(handle.group.clone())
            .or_default()
            .insert(handle.id, handle.clone());

        if previous.is_some() {
            // Lost a race against a concurrent registration of the same handle
            self.release_slot();
        }

        tracing::info!(
            connection_id = %handle.id,
            group = %handle.group,
            user_id = ?handle.user_id,
            "Connection registered"
        );

        Ok(())
    }

    /// Remove a connection from its group and, if it is still the user's
    /// addressable connection, from the user index.
    ///
    /// Unregistering a connection that is not present is a no-op.
    pub fn unregister(&self, handle: &ConnectionHandle) {
        // Removal and the empty-set check share one shard lock, so readers
        // never observe a group without members.
        let removed = match self.groups.entry(handle.group.clone()) {
            Entry::Occupied(mut members) => {
                let removed = members.get_mut().remove(&handle.id).is_some();
                if members.get().is_empty() {
                    members.remove();
                }
                removed
            }
            Entry::Vacant(_) => false,
        };

        if let Some(user_id) = handle.user_id {
            self.by_user
                .remove_if(&user_id, |_, current| current.id == handle.id);
        }

        if removed {
            self.release_slot();
            tracing::info!(
                connection_id = %handle.id,
                group = %handle.group,
                user_id = ?handle.user_id,
                "Connection unregistered"
            );
        }
    }

    /// Send a message to every connection in `group`.
    ///
    /// Recipients are snapshotted before any send starts; a failure for one
    /// recipient does not stop delivery to the others.
    #[tracing::instrument(name = "registry.broadcast", skip(self, message))]
    pub async fn broadcast(&self, group: &str, message: ServerMessage) -> BroadcastReport {
        let recipients = self.group_members(group);
        if recipients.is_empty() {
            return BroadcastReport::empty(group);
        }

        // Serialize once for all recipients
        let outbound = match OutboundMessage::preserialize(&message) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "Failed to pre-serialize broadcast message");
                OutboundMessage::Raw(message)
            }
        };

        let attempted = recipients.len();
        let mut sends: FuturesUnordered<_> = recipients
            .into_iter()
            .map(|handle| {
                let msg = outbound.clone();
                async move {
                    let result = handle.send_outbound(msg).await;
                    (handle.id, result)
                }
            })
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        while let Some((connection_id, result)) = sends.next().await {
            match result {
                Ok(()) => delivered += 1,
                Err(error) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        error = %error,
                        "Broadcast delivery failed"
                    );
                    failed.push(DeliveryFailure {
                        connection_id,
                        error,
                    });
                }
            }
        }

        self.fanout.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.record_outcome(delivered, failed.len());

        tracing::debug!(
            attempted = attempted,
            delivered = delivered,
            failed = failed.len(),
            "Broadcast completed"
        );

        BroadcastReport {
            group: group.to_string(),
            attempted,
            delivered,
            failed,
        }
    }

    /// Send a message to the user's addressable connection.
    ///
    /// Returns true only if a connection was found and accepted the message.
    #[tracing::instrument(name = "registry.send_to_user", skip(self, message))]
    pub async fn send_to_user(&self, user_id: UserId, message: ServerMessage) -> bool {
        let Some(handle) = self.user_connection(user_id) else {
            return false;
        };

        self.fanout.direct_sends.fetch_add(1, Ordering::Relaxed);
        match handle.send(message).await {
            Ok(()) => {
                self.record_outcome(1, 0);
                true
            }
            Err(e) => {
                tracing::debug!(
                    connection_id = %handle.id,
                    error = %e,
                    "Direct delivery failed"
                );
                self.record_outcome(0, 1);
                false
            }
        }
    }

    /// Snapshot of the connections currently in a group
    pub fn group_members(&self, group: &str) -> Vec<Arc<ConnectionHandle>> {
        self.groups
            .get(group)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Per-connection views for a group, oldest connection first.
    ///
    /// `None` when the group has no members.
    pub fn group_connections(&self, group: &str) -> Option<Vec<ConnectionInfo>> {
        let mut connections: Vec<_> = self
            .groups
            .get(group)?
            .values()
            .map(|handle| handle.info())
            .collect();
        connections.sort_by_key(|info| info.connected_at);
        Some(connections)
    }

    /// The connection currently addressable for a user
    pub fn user_connection(&self, user_id: UserId) -> Option<Arc<ConnectionHandle>> {
        self.by_user.get(&user_id).map(|h| h.value().clone())
    }

    pub fn group_info(&self, group: &str) -> Option<GroupInfo> {
        self.groups.get(group).map(|members| GroupInfo {
            name: group.to_string(),
            connection_count: members.len(),
        })
    }

    /// Whether this exact connection is registered under its group
    pub fn contains(&self, handle: &ConnectionHandle) -> bool {
        self.groups
            .get(&handle.group)
            .map(|members| members.contains_key(&handle.id))
            .unwrap_or(false)
    }

    /// Get all connections
    pub fn all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.groups
            .iter()
            .flat_map(|entry| entry.value().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    /// Get statistics
    pub fn stats(&self) -> ConnectionStats {
        let groups = self
            .groups
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect();

        ConnectionStats {
            total_connections: self.connection_count(),
            unique_users: self.by_user.len(),
            groups,
        }
    }

    pub fn fanout_stats(&self) -> FanoutStatsSnapshot {
        self.fanout.snapshot()
    }

    /// Drop every registered handle. Used once at process shutdown.
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        self.groups.retain(|_, members| {
            dropped += members.len();
            false
        });
        self.by_user.clear();
        self.total.fetch_sub(dropped, Ordering::AcqRel);

        tracing::info!(dropped = dropped, "Connection registry cleared");
        dropped
    }

    fn index_user(
        &self,
        user_id: UserId,
        handle: &Arc<ConnectionHandle>,
    ) -> Result<(), ConnectionError> {
        match self.by_user.entry(user_id) {
            Entry::Occupied(mut current) => {
                if current.get().id == handle.id {
                    return Ok(());
                }
                match self.limits.duplicate_user_policy {
                    DuplicateUserPolicy::RejectNew if !current.get().is_closed() => {
                        Err(ConnectionError::UserAlreadyConnected { user_id })
                    }
                    _ => {
                        let evicted = current.insert(handle.clone());
                        tracing::debug!(
                            user_id = user_id,
                            evicted_connection_id = %evicted.id,
                            connection_id = %handle.id,
                            "User index moved to newer connection"
                        );
                        Ok(())
                    }
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(handle.clone());
                Ok(())
            }
        }
    }

    fn reserve_slot(&self) -> Result<(), ConnectionError> {
        let max = self.limits.max_connections;
        if max == 0 {
            self.total.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        }

        self.total
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .map(|_| ())
            .map_err(|current| ConnectionError::TotalLimitExceeded { current, max })
    }

    fn release_slot(&self) {
        self.total.fetch_sub(1, Ordering::AcqRel);
    }

    fn record_outcome(&self, delivered: usize, failed: usize) {
        self.fanout
            .total_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.fanout
            .total_failed
            .fetch_add(failed as u64, Ordering::Relaxed);
        FanoutMetrics::record_delivered(delivered as u64);
        FanoutMetrics::record_failed(failed as u64);
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
