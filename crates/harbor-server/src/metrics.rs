//! Metrics collection and export for harbor.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use harbor_core::HubStats;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const SESSIONS_TOTAL: &str = "harbor_sessions_total";
    pub const SESSIONS_ACTIVE: &str = "harbor_sessions_active";
    pub const MESSAGES_TOTAL: &str = "harbor_messages_total";
    pub const MESSAGES_BYTES: &str = "harbor_messages_bytes";
    pub const ROOMS_ACTIVE: &str = "harbor_rooms_active";
    pub const MAILBOX_EVICTIONS: &str = "harbor_mailbox_evictions";
    pub const ERRORS_TOTAL: &str = "harbor_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::SESSIONS_TOTAL,
        "Total number of sessions since server start"
    );
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Current number of live sessions");
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of messages processed");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of live rooms");
    metrics::describe_gauge!(
        names::MAILBOX_EVICTIONS,
        "Sessions evicted for a stalled mailbox since server start"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new session.
pub fn record_session() {
    counter!(names::SESSIONS_TOTAL).increment(1);
    gauge!(names::SESSIONS_ACTIVE).increment(1.0);
}

/// Record a session ending.
pub fn record_session_end() {
    gauge!(names::SESSIONS_ACTIVE).decrement(1.0);
}

/// Record a message.
pub fn record_message(bytes: usize, direction: &str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction.to_string()).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction.to_string()).increment(bytes as u64);
}

/// Update the live room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Update the cumulative mailbox eviction count.
pub fn set_mailbox_evictions(total: u64) {
    gauge!(names::MAILBOX_EVICTIONS).set(total as f64);
}

/// Refresh the gauges derived from hub state.
///
/// Called after every dispatch as well as at session end, so room
/// churn from in-session join/leave shows up without waiting for a
/// disconnect.
pub fn refresh_hub_gauges(stats: &HubStats) {
    set_active_rooms(stats.rooms);
    set_mailbox_evictions(stats.evictions);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records the session end on drop.
pub struct SessionMetricsGuard;

impl SessionMetricsGuard {
    /// Create a new metrics guard, recording a session start.
    #[must_use]
    pub fn new() -> Self {
        record_session();
        Self
    }
}

impl Default for SessionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionMetricsGuard {
    fn drop(&mut self) {
        record_session_end();
    }
}
