//! Metrics for the Beacon server, exported in Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tenvis_beacon_core::{Endpoint, HubStats, SweepReport};
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "beacon_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "beacon_connections_active";
    pub const MESSAGES_TOTAL: &str = "beacon_messages_total";
    pub const MESSAGES_BYTES: &str = "beacon_messages_bytes";
    pub const CHANNELS_ACTIVE: &str = "beacon_channels_active";
    pub const SUBSCRIPTIONS_ACTIVE: &str = "beacon_subscriptions_active";
    pub const PRODUCERS_ACTIVE: &str = "beacon_producers_active";
    pub const ERRORS_TOTAL: &str = "beacon_errors_total";
    pub const TERMINATIONS_TOTAL: &str = "beacon_liveness_terminations_total";
}

/// Register metric descriptions.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames by direction");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total frame bytes by direction");
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of active channels");
    metrics::describe_gauge!(
        names::SUBSCRIPTIONS_ACTIVE,
        "Current number of channel subscriptions"
    );
    metrics::describe_gauge!(names::PRODUCERS_ACTIVE, "Authenticated producer devices");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors by kind");
    metrics::describe_counter!(
        names::TERMINATIONS_TOTAL,
        "Connections dropped for missing a heartbeat"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a frame.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record an error.
pub fn record_error(kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "kind" => kind).increment(1);
}

/// Record a liveness sweep.
pub fn record_sweep(report: &SweepReport) {
    counter!(names::TERMINATIONS_TOTAL).increment(report.terminated.len() as u64);
}

/// Publish hub gauges.
pub fn record_hub(stats: &HubStats) {
    gauge!(names::CHANNELS_ACTIVE).set(stats.channels as f64);
    gauge!(names::SUBSCRIPTIONS_ACTIVE).set(stats.subscriptions as f64);
    gauge!(names::PRODUCERS_ACTIVE).set(stats.producers as f64);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard {
    endpoint: &'static str,
}

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        let endpoint = endpoint.as_str();
        counter!(names::CONNECTIONS_TOTAL, "endpoint" => endpoint).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE, "endpoint" => endpoint).increment(1.0);
        Self { endpoint }
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE, "endpoint" => self.endpoint).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder() {
        // No recorder installed; every call is a no-op
        let _guard = ConnectionMetricsGuard::new(Endpoint::Producer);
        record_message(12, "inbound");
        record_error("websocket");
        record_sweep(&SweepReport::default());
    }
}
