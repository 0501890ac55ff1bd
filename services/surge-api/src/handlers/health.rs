//! Liveness and metrics endpoints.

use surge_core::metrics::export_prometheus;

/// Liveness probe.
pub async fn health_check() -> &'static str {
    "ok"
}

/// Prometheus metrics in text exposition format.
pub async fn metrics_handler() -> String {
    export_prometheus()
}
