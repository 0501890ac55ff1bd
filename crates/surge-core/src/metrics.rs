//! Process-wide Prometheus metrics for the Surge service.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    /// Total API requests by method, path, and status code.
    pub static ref API_REQUEST_COUNT: IntCounterVec = register_int_counter_vec!(
        "surge_api_requests_total",
        "Total API requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// API request latency distribution (seconds).
    pub static ref API_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "surge_api_request_duration_seconds",
        "API request latency in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .unwrap();

    /// In-flight API requests.
    pub static ref ACTIVE_CONNECTIONS: IntGauge = register_int_gauge!(
        "surge_api_active_connections",
        "In-flight API requests"
    )
    .unwrap();

    /// Currently executing load-test runs.
    pub static ref ACTIVE_RUNS: IntGauge = register_int_gauge!(
        "surge_active_runs",
        "Currently executing load-test runs"
    )
    .unwrap();

    /// Runs admitted and started since process start.
    pub static ref RUNS_STARTED_TOTAL: IntCounter = register_int_counter!(
        "surge_runs_started_total",
        "Load-test runs admitted and started"
    )
    .unwrap();

    /// Requests issued by virtual users, labeled by outcome.
    pub static ref OUTBOUND_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "surge_outbound_requests_total",
        "Requests issued by virtual users",
        &["outcome"]
    )
    .unwrap();

    /// Samples dropped because the sink buffer was full.
    pub static ref SAMPLE_SINK_DROPPED_TOTAL: IntCounter = register_int_counter!(
        "surge_sample_sink_dropped_total",
        "Samples dropped due to a full sink buffer"
    )
    .unwrap();

    /// Sample rows that failed to persist.
    pub static ref SAMPLE_WRITE_FAILURES_TOTAL: IntCounter = register_int_counter!(
        "surge_sample_write_failures_total",
        "Sample rows that failed to persist"
    )
    .unwrap();
}

/// Exports all registered metrics in Prometheus text format.
pub fn export_prometheus() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .unwrap_or_else(|err| {
            tracing::error!("failed to encode metrics: {err}");
        });

    String::from_utf8(buffer).unwrap_or_else(|err| {
        tracing::error!("failed to convert metrics to UTF-8: {err}");
        String::from("# error encoding metrics\n")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_contains_registered_families() {
        API_REQUEST_COUNT
            .with_label_values(&["GET", "/health", "200"])
            .inc();
        OUTBOUND_REQUESTS_TOTAL.with_label_values(&["success"]).inc();

        let output = export_prometheus();
        assert!(output.contains("surge_api_requests_total"));
        assert!(output.contains("surge_outbound_requests_total"));
        assert!(output.contains("# HELP"));
    }
}
