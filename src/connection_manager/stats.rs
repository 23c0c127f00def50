//! Connection statistics and fan-out reports

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{SendError, UserId};

/// Connection statistics
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub unique_users: usize,
    pub groups: HashMap<String, usize>,
}

/// Group information
#[derive(Debug, Clone, Serialize)]
pub struct GroupInfo {
    pub name: String,
    pub connection_count: usize,
}

/// Read-only view of one connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: Uuid,
    pub group: String,
    pub user_id: Option<UserId>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// A recipient that did not get a fan-out message
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryFailure {
    pub connection_id: Uuid,
    pub error: SendError,
}

/// Outcome of a group broadcast
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastReport {
    pub group: String,
    /// Recipients in the snapshot taken at call time
    pub attempted: usize,
    pub delivered: usize,
    pub failed: Vec<DeliveryFailure>,
}

impl BroadcastReport {
    pub fn empty(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            attempted: 0,
            delivered: 0,
            failed: Vec::new(),
        }
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// Running totals for fan-out traffic
#[derive(Debug, Default)]
pub struct FanoutStats {
    pub broadcasts: AtomicU64,
    pub direct_sends: AtomicU64,
    pub total_delivered: AtomicU64,
    pub total_failed: AtomicU64,
}

impl FanoutStats {
    pub fn snapshot(&self) -> FanoutStatsSnapshot {
        FanoutStatsSnapshot {
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            direct_sends: self.direct_sends.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of fan-out statistics
#[derive(Debug, Clone, Serialize)]
pub struct FanoutStatsSnapshot {
    pub broadcasts: u64,
    pub direct_sends: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
}
