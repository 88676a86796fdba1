//! Prometheus metrics for rift-tcp-proxy.
//!
//! Process-local counters for sessions, injected faults and forwarded bytes.
use crate::proxy::Direction;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::time::Duration;

lazy_static! {
    /// Sessions by outcome of the upstream dial
    pub static ref SESSIONS_TOTAL: CounterVec = register_counter_vec!(
        "rift_tcp_sessions_total",
        "Total number of client connections handled by the relay",
        &["result"]  // result: opened|dial_failed
    )
    .unwrap();

    /// Live sessions across every relay in the process
    pub static ref ACTIVE_SESSIONS: Gauge = register_gauge!(
        "rift_tcp_active_sessions",
        "Number of sessions currently registered"
    )
    .unwrap();

    /// Total number of faults injected
    pub static ref FAULTS_INJECTED_TOTAL: CounterVec = register_counter_vec!(
        "rift_tcp_faults_injected_total",
        "Total number of faults injected into relayed chunks",
        &["type", "direction"]  // type: drop|corrupt|stall
    )
    .unwrap();

    pub static ref BYTES_FORWARDED_TOTAL: CounterVec = register_counter_vec!(
        "rift_tcp_bytes_forwarded_total",
        "Total number of bytes written to the destination endpoint",
        &["direction"]
    )
    .unwrap();

    /// Latency added per forwarded chunk in milliseconds
    pub static ref LATENCY_INJECTED_MS: HistogramVec = register_histogram_vec!(
        "rift_tcp_latency_injected_ms",
        "Histogram of latency added per chunk in milliseconds",
        &["direction"],
        vec![0.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_session(result: &str) {
    SESSIONS_TOTAL.with_label_values(&[result]).inc();
}

pub fn session_registered() {
    ACTIVE_SESSIONS.inc();
}

pub fn session_unregistered() {
    ACTIVE_SESSIONS.dec();
}

pub fn record_fault(fault_type: &str, direction: Direction) {
    FAULTS_INJECTED_TOTAL
        .with_label_values(&[fault_type, direction.as_str()])
        .inc();
}

pub fn record_forwarded(direction: Direction, bytes: usize) {
    BYTES_FORWARDED_TOTAL
        .with_label_values(&[direction.as_str()])
        .inc_by(bytes as f64);
}

pub fn record_latency(direction: Direction, delay: Duration) {
    LATENCY_INJECTED_MS
        .with_label_values(&[direction.as_str()])
        .observe(delay.as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collection() {
        record_session("opened");
        record_fault("drop", Direction::ClientToUpstream);
        record_forwarded(Direction::UpstreamToClient, 128);
        record_latency(Direction::UpstreamToClient, Duration::from_millis(80));
        session_registered();
        session_unregistered();

        let metrics = collect_metrics();

        assert!(metrics.contains("rift_tcp_sessions_total"));
        assert!(metrics.contains("rift_tcp_active_sessions"));
        assert!(metrics.contains("rift_tcp_faults_injected_total"));
        assert!(metrics.contains("rift_tcp_bytes_forwarded_total"));
        assert!(metrics.contains("rift_tcp_latency_injected_ms"));
    }

    #[test]
    fn test_fault_labels_are_distinct() {
        record_fault("drop", Direction::ClientToUpstream);
        record_fault("corrupt", Direction::ClientToUpstream);
        record_fault("stall", Direction::UpstreamToClient);

        let metrics = collect_metrics();
        assert!(metrics.contains(r#"type="drop""#));
        assert!(metrics.contains(r#"type="corrupt""#));
        assert!(metrics.contains(r#"type="stall""#));
        assert!(metrics.contains(r#"direction="upstream->client""#));
    }
}
