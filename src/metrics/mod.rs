//! Prometheus metrics for the backend.
//!
//! - Connection metrics (active connections, groups, users, lifetimes)
//! - Inbound WebSocket message metrics by kind
//! - Fan-out delivery metrics
//! - Heartbeat and database health metrics

mod helpers;

pub use helpers::{
    encode_metrics, FanoutMetrics, HeartbeatMetrics, SessionMetrics, WsMessageMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "nexus";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Total number of registered WebSocket connections
    pub static ref CONNECTIONS_TOTAL: IntGauge = register_int_gauge!(
        format!("{}_connections_total", METRIC_PREFIX),
        "Total number of registered WebSocket connections"
    ).unwrap();

    /// Number of users with an addressable connection
    pub static ref USERS_CONNECTED: IntGauge = register_int_gauge!(
        format!("{}_users_connected", METRIC_PREFIX),
        "Number of users with an addressable connection"
    ).unwrap();

    /// Number of connection groups with at least one member
    pub static ref GROUPS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_groups_active", METRIC_PREFIX),
        "Number of connection groups with at least one member"
    ).unwrap();

    /// Total WebSocket connections opened
    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// Total WebSocket connections closed
    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// Sessions closed by reason
    pub static ref WS_SESSIONS_CLOSED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_sessions_closed_total", METRIC_PREFIX),
        "WebSocket sessions closed by reason",
        &["reason"]
    ).unwrap();

    /// Inbound messages by kind
    pub static ref WS_MESSAGES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_messages_received_total", METRIC_PREFIX),
        "Inbound WebSocket messages by kind",
        &["kind"]
    ).unwrap();

    /// Connection lifetime
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]
    ).unwrap();

    // ============================================================================
    // Fan-out Metrics
    // ============================================================================

    /// Messages handed to a recipient's queue
    pub static ref FANOUT_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_fanout_delivered_total", METRIC_PREFIX),
        "Fan-out messages successfully queued for a connection"
    ).unwrap();

    /// Messages that could not be handed to a recipient
    pub static ref FANOUT_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_fanout_failed_total", METRIC_PREFIX),
        "Fan-out messages that failed to reach a connection"
    ).unwrap();

    // ============================================================================
    // Heartbeat & Health Metrics
    // ============================================================================

    /// Duration of one heartbeat round
    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Heartbeat round duration in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]
    ).unwrap();

    /// Heartbeat sends that timed out
    pub static ref HEARTBEAT_TIMEOUTS: IntCounter = register_int_counter!(
        format!("{}_heartbeat_timeouts_total", METRIC_PREFIX),
        "Heartbeat sends that timed out"
    ).unwrap();

    /// Database probe result (1 = reachable, 0 = unreachable or disabled)
    pub static ref DATABASE_UP: IntGauge = register_int_gauge!(
        format!("{}_database_up", METRIC_PREFIX),
        "Database probe result (1=reachable, 0=unreachable or disabled)"
    ).unwrap();
}
