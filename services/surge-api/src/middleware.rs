//! Request-scoped middleware: request-id propagation and request metrics.

use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::header::HeaderValue;
use axum::http::{Request, Response};
use axum::middleware::Next;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use surge_core::metrics::{ACTIVE_CONNECTIONS, API_REQUEST_COUNT, API_REQUEST_DURATION};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Echoes the caller's `X-Request-ID` (generating one when absent) and tags
/// the request span with it for correlation.
pub async fn propagate_request_id(req: Request<Body>, next: Next) -> Response<Body> {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = info_span!(
        "http_request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Records Prometheus counters and latency for every request.
pub async fn track_metrics(req: Request<Body>, next: Next) -> Response<Body> {
    let start = Instant::now();
    let method = req.method().clone();

    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unknown".to_string());

    ACTIVE_CONNECTIONS.inc();
    let response = next.run(req).await;
    ACTIVE_CONNECTIONS.dec();

    let status = response.status().as_u16().to_string();
    API_REQUEST_COUNT
        .with_label_values(&[method.as_str(), &path, &status])
        .inc();
    API_REQUEST_DURATION
        .with_label_values(&[method.as_str(), &path])
        .observe(start.elapsed().as_secs_f64());

    response
}
