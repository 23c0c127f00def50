use prometheus::{Encoder, TextEncoder};

use crate::websocket::CloseReason;

use super::{
    FANOUT_DELIVERED_TOTAL, FANOUT_FAILED_TOTAL, HEARTBEAT_DURATION_MS, HEARTBEAT_TIMEOUTS,
    WS_MESSAGES_RECEIVED, WS_SESSIONS_CLOSED,
};

/// Encode all registered metrics in the Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording fan-out metrics
pub struct FanoutMetrics;

impl FanoutMetrics {
    pub fn record_delivered(count: u64) {
        FANOUT_DELIVERED_TOTAL.inc_by(count);
    }

    pub fn record_failed(count: u64) {
        FANOUT_FAILED_TOTAL.inc_by(count);
    }
}

/// Helper struct for inbound WebSocket message metrics
pub struct WsMessageMetrics;

impl WsMessageMetrics {
    /// Record an inbound message (`ping`, `echo`, `invalid`, `binary`)
    pub fn record(kind: &str) {
        WS_MESSAGES_RECEIVED.with_label_values(&[kind]).inc();
    }
}

pub struct SessionMetrics;

impl SessionMetrics {
    pub fn record_close(reason: CloseReason) {
        WS_SESSIONS_CLOSED
            .with_label_values(&[reason.as_str()])
            .inc();
    }
}

/// Helper struct for heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_duration_ms(ms: u64) {
        HEARTBEAT_DURATION_MS.observe(ms as f64);
    }

    pub fn record_timeouts(count: u64) {
        HEARTBEAT_TIMEOUTS.inc_by(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_recorded_metrics() {
        WsMessageMetrics::record("ping");
        FanoutMetrics::record_delivered(2);
        SessionMetrics::record_close(CloseReason::StreamEnded);

        let output = encode_metrics().unwrap();
        assert!(output.contains("nexus_ws_messages_received_total"));
        assert!(output.contains("nexus_fanout_delivered_total"));
        assert!(output.contains("reason=\"stream_ended\""));
    }
}
