use axum::extract::Request;
use axum::middleware;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::handlers::{
    get_historical_metrics, get_report, get_status, get_timeseries, health_check, list_history,
    list_running, live_metrics, metrics_handler, start_run, stop_run,
};
use crate::middleware::{propagate_request_id, track_metrics};
use crate::state::AppState;

/// Builds the Axum router hosting the REST control surface.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Liveness and metrics (outside the /api tree)
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        // Run lifecycle
        .route("/api/runs", post(start_run))
        .route("/api/runs/running", get(list_running))
        .route("/api/runs/history", get(list_history))
        .route("/api/runs/:id", get(get_status))
        .route("/api/runs/:id/metrics", get(live_metrics))
        .route("/api/runs/:id/timeseries", get(get_timeseries))
        .route("/api/runs/:id/historical-metrics", get(get_historical_metrics))
        .route("/api/runs/:id/report", get(get_report))
        .route("/api/runs/:id/stop", post(stop_run))
        .with_state(state)
        .layer(middleware::from_fn(track_metrics))
        .layer(middleware::from_fn(propagate_request_id))
        .layer(
            TraceLayer::new_for_http()
                .on_request(|_request: &Request, _span: &Span| {
                    tracing::debug!("started processing request");
                })
                .on_response(|response: &Response, latency: Duration, _span: &Span| {
                    let status = response.status();
                    let latency_ms = latency.as_millis();

                    if status.is_server_error() {
                        tracing::error!(status = %status, latency_ms, "request failed");
                    } else if status.is_client_error() {
                        tracing::warn!(status = %status, latency_ms, "request rejected");
                    } else {
                        tracing::info!(status = %status, latency_ms, "request completed");
                    }
                }),
        )
}
