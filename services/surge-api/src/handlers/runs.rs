//! Run lifecycle handlers.

use std::net::SocketAddr;
use std::str::FromStr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use surge_core::{
    series_from_samples, CoreError, RunDescriptor, RunId, RunPlan, SeriesPoint,
};
use surge_engine::MetricsSnapshot;

use crate::report::{latency_percentiles, ReportDocument};
use crate::state::AppState;

/// Error body shared by all endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// API error types mapped onto HTTP status classes.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    RateLimited(String),
    Capacity(String),
    NotFound(String),
    Internal(String),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidParameter { .. } | CoreError::TargetRejected { .. } => {
                Self::Validation(err.to_string())
            }
            CoreError::RateLimited { .. } => Self::RateLimited(err.to_string()),
            CoreError::CapacityExceeded { .. } => Self::Capacity(err.to_string()),
            CoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::RateLimited(msg) | Self::Capacity(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Internal(msg) => {
                error!("internal error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Response for a successful start.
#[derive(Debug, Serialize)]
pub struct StartRunResponse {
    pub run_id: RunId,
    pub run_key: i64,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub is_running: bool,
    pub run: RunDescriptor,
}

#[derive(Debug, Serialize)]
pub struct LiveMetricsResponse {
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
    pub is_running: bool,
    pub stopped_by_circuit: bool,
}

#[derive(Debug, Serialize)]
pub struct RunningRunSummary {
    pub run_id: RunId,
    pub target: String,
    pub users: u32,
    pub duration_sec: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HistoricalMetricsResponse {
    pub run: RunDescriptor,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub error_rate: f64,
    pub time_series: Vec<SeriesPoint>,
}

/// Caller identity for admission accounting: the first `X-Forwarded-For`
/// entry when present, else the network peer.
fn caller_identity(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| addr.ip().to_string())
}

fn parse_run_id(raw: &str) -> Result<RunId, ApiError> {
    RunId::from_str(raw).map_err(|_| ApiError::Validation(format!("invalid run id `{raw}`")))
}

/// Snapshot shape for a run whose aggregator is gone; percentiles live on
/// the historical endpoint.
fn snapshot_from_descriptor(run: &RunDescriptor) -> MetricsSnapshot {
    let elapsed = run
        .completed_at
        .map(|at| (at - run.started_at).num_milliseconds() as f64 / 1_000.0)
        .unwrap_or(0.0);

    MetricsSnapshot {
        total_requests: run.total_requests,
        success_count: run.success_count,
        error_count: run.error_count,
        min_latency_ms: run.min_latency_ms,
        max_latency_ms: run.max_latency_ms,
        avg_latency_ms: run.avg_latency_ms,
        p50_latency_ms: 0.0,
        p95_latency_ms: 0.0,
        p99_latency_ms: 0.0,
        error_rate: run.error_rate(),
        rps: run.rps,
        rolling_avg_rps: 0.0,
        elapsed_seconds: elapsed,
    }
}

/// POST /api/runs
pub async fn start_run(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(plan): Json<RunPlan>,
) -> Result<Json<StartRunResponse>, ApiError> {
    let caller = caller_identity(&headers, addr);
    let (run_id, run_key) = state.service.start_run(&caller, plan).await?;

    Ok(Json(StartRunResponse {
        run_id,
        run_key,
        status: "started",
    }))
}

/// GET /api/runs/{id}
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let run_id = parse_run_id(&id)?;

    if let Some(handle) = state.service.live_handle(run_id).await {
        return Ok(Json(StatusResponse {
            is_running: handle.is_running(),
            run: handle.live_descriptor(),
        }));
    }

    let run = state
        .service
        .run_store()
        .get(run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("run `{run_id}` was not found")))?;

    Ok(Json(StatusResponse {
        is_running: false,
        run,
    }))
}

/// GET /api/runs/{id}/metrics
pub async fn live_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LiveMetricsResponse>, ApiError> {
    let run_id = parse_run_id(&id)?;

    if let Some(handle) = state.service.live_handle(run_id).await {
        return Ok(Json(LiveMetricsResponse {
            snapshot: handle.snapshot(),
            is_running: handle.is_running(),
            stopped_by_circuit: handle.stopped_by_circuit(),
        }));
    }

    let run = state
        .service
        .run_store()
        .get(run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("run `{run_id}` was not found")))?;

    Ok(Json(LiveMetricsResponse {
        snapshot: snapshot_from_descriptor(&run),
        is_running: false,
        stopped_by_circuit: run.stopped_by_circuit,
    }))
}

/// GET /api/runs/{id}/timeseries
pub async fn get_timeseries(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<SeriesPoint>>, ApiError> {
    let run_id = parse_run_id(&id)?;

    let handle = state
        .service
        .live_handle(run_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("run `{run_id}` is not active")))?;

    Ok(Json(handle.timeseries()))
}

/// GET /api/runs/running
pub async fn list_running(
    State(state): State<AppState>,
) -> Json<Vec<RunningRunSummary>> {
    let summaries = state
        .service
        .list_running()
        .await
        .into_iter()
        .map(|handle| {
            let run = handle.descriptor();
            RunningRunSummary {
                run_id: run.run_id,
                target: run.target.clone(),
                users: run.users,
                duration_sec: run.duration_sec,
                started_at: run.started_at,
            }
        })
        .collect();

    Json(summaries)
}

/// GET /api/runs/history
pub async fn list_history(
    State(state): State<AppState>,
) -> Result<Json<Vec<RunDescriptor>>, ApiError> {
    let runs = state.service.run_store().list_recent(10).await?;
    Ok(Json(runs))
}

/// GET /api/runs/{id}/historical-metrics
pub async fn get_historical_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoricalMetricsResponse>, ApiError> {
    let run_id = parse_run_id(&id)?;

    let run = state
        .service
        .run_store()
        .get(run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("run `{run_id}` was not found")))?;

    let samples = state.service.sample_store().for_run(run.run_key).await?;
    let (p50, p95, p99) = latency_percentiles(&samples);
    let time_series = series_from_samples(&samples, run.started_at);
    let error_rate = run.error_rate();

    Ok(Json(HistoricalMetricsResponse {
        run,
        p50_latency_ms: p50,
        p95_latency_ms: p95,
        p99_latency_ms: p99,
        error_rate,
        time_series,
    }))
}

/// GET /api/runs/{id}/report
pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReportDocument>, ApiError> {
    let run_id = parse_run_id(&id)?;

    // An active run reports from its live aggregator; finished runs rebuild
    // from the stored stream.
    if let Some(handle) = state.service.live_handle(run_id).await {
        let snapshot = handle.snapshot();
        let series = handle.timeseries();
        return Ok(Json(ReportDocument::from_live(
            handle.live_descriptor(),
            &snapshot,
            series,
        )));
    }

    let run = state
        .service
        .run_store()
        .get(run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("run `{run_id}` was not found")))?;
    let samples = state.service.sample_store().for_run(run.run_key).await?;

    Ok(Json(ReportDocument::from_samples(run, &samples)))
}

/// POST /api/runs/{id}/stop
pub async fn stop_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunDescriptor>, ApiError> {
    let run_id = parse_run_id(&id)?;
    let run = state.service.stop_run(run_id).await?;
    Ok(Json(run))
}
