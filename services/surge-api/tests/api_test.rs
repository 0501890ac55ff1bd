//! Router-level tests for the REST control surface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use surge_api::{build_router, AppState};
use surge_core::{RunStore, SampleStore};
use surge_engine::RunService;
use surge_store::{create_sqlite_pool, run_migrations, SampleSink, SqliteRunStore, SqliteSampleStore};

async fn test_app() -> Router {
    let db_path = temp_db_path();
    let database_url = format!("sqlite://{}", db_path.display());
    let pool = create_sqlite_pool(&database_url, 8)
        .await
        .expect("failed to create pool");
    run_migrations(&pool).await.expect("failed migrations");

    let runs: Arc<dyn RunStore> = Arc::new(SqliteRunStore::new(pool.clone()));
    let samples: Arc<dyn SampleStore> = Arc::new(SqliteSampleStore::new(pool));
    let (sink, _writer) = SampleSink::spawn(Arc::clone(&samples));
    let service = RunService::new(runs, samples, sink).expect("service");

    let addr: SocketAddr = "198.51.100.7:43210".parse().expect("addr");
    build_router(AppState::new(service)).layer(MockConnectInfo(addr))
}

fn temp_db_path() -> PathBuf {
    let filename = format!("surge-api-test-{}.db", Uuid::new_v4());
    std::env::temp_dir().join(filename)
}

fn start_request(body: Value, caller: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/runs")
        .header("content-type", "application/json")
        .header("x-forwarded-for", caller)
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

// An unresolvable-but-public-looking host: requests fail fast without
// leaving the machine.
const UNREACHABLE_TARGET: &str = "https://surge-test-target.invalid";

fn valid_plan() -> Value {
    json!({
        "target": UNREACHABLE_TARGET,
        "users": 1,
        "ramp_sec": 0,
        "duration_sec": 1,
    })
}

#[tokio::test]
async fn start_rejects_loopback_target() {
    let app = test_app().await;

    let response = app
        .oneshot(start_request(
            json!({"target": "http://127.0.0.1", "users": 2, "ramp_sec": 0, "duration_sec": 2}),
            "10.0.0.1",
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().expect("error message").contains("target"));
}

#[tokio::test]
async fn start_rejects_out_of_range_users() {
    let app = test_app().await;

    let response = app
        .oneshot(start_request(
            json!({"target": "http://example.com", "users": 2_000, "ramp_sec": 0, "duration_sec": 2}),
            "10.0.0.2",
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn start_rejects_body_on_get() {
    let app = test_app().await;

    let response = app
        .oneshot(start_request(
            json!({
                "target": "http://example.com",
                "users": 2,
                "ramp_sec": 0,
                "duration_sec": 2,
                "method": "GET",
                "body": "{\"x\":1}",
            }),
            "10.0.0.3",
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn second_start_within_cooldown_is_rate_limited() {
    let app = test_app().await;

    let first = app
        .clone()
        .oneshot(start_request(valid_plan(), "203.0.113.9"))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::OK);
    let body = body_json(first).await;
    assert_eq!(body["status"], "started");
    assert!(body["run_id"].as_str().is_some());
    assert!(body["run_key"].as_i64().expect("run_key") > 0);

    let second = app
        .oneshot(start_request(valid_plan(), "203.0.113.9"))
        .await
        .expect("response");
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn rate_limit_is_per_caller() {
    let app = test_app().await;

    let first = app
        .clone()
        .oneshot(start_request(valid_plan(), "203.0.113.10"))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::OK);

    let other_caller = app
        .oneshot(start_request(valid_plan(), "203.0.113.11"))
        .await
        .expect("response");
    assert_eq!(other_caller.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_run_is_not_found() {
    let app = test_app().await;
    let missing = Uuid::new_v4();

    for uri in [
        format!("/api/runs/{missing}"),
        format!("/api/runs/{missing}/metrics"),
        format!("/api/runs/{missing}/timeseries"),
        format!("/api/runs/{missing}/historical-metrics"),
        format!("/api/runs/{missing}/report"),
    ] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(&uri)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "GET {uri}");
    }

    let stop = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/runs/{missing}/stop"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(stop.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_run_id_is_a_validation_error() {
    let app = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/runs/not-a-run-id")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn request_id_is_echoed_or_generated() {
    let app = test_app().await;

    let echoed = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "trace-me-42")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(
        echoed
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok()),
        Some("trace-me-42")
    );

    let generated = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let value = generated
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .expect("generated request id");
    assert!(Uuid::parse_str(value).is_ok());
}

#[tokio::test]
async fn empty_history_is_an_empty_list() {
    let app = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/runs/history")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!([]));
}

#[tokio::test]
async fn started_run_is_visible_then_stoppable() {
    let app = test_app().await;

    let started = app
        .clone()
        .oneshot(start_request(
            json!({
                "target": UNREACHABLE_TARGET,
                "users": 1,
                "ramp_sec": 0,
                "duration_sec": 30,
            }),
            "203.0.113.20",
        ))
        .await
        .expect("response");
    assert_eq!(started.status(), StatusCode::OK);
    let run_id = body_json(started).await["run_id"]
        .as_str()
        .expect("run_id")
        .to_string();

    let listed = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/runs/running")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let running = body_json(listed).await;
    assert_eq!(running.as_array().expect("array").len(), 1);
    assert_eq!(running[0]["run_id"], run_id.as_str());

    let status = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/runs/{run_id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let status_body = body_json(status).await;
    assert_eq!(status_body["is_running"], json!(true));
    assert_eq!(status_body["run"]["status"], "running");

    let stopped = tokio::time::timeout(
        Duration::from_secs(30),
        app.clone().oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/runs/{run_id}/stop"))
                .body(Body::empty())
                .expect("request"),
        ),
    )
    .await
    .expect("stop finished")
    .expect("response");
    assert_eq!(stopped.status(), StatusCode::OK);
    let stopped_body = body_json(stopped).await;
    assert_eq!(stopped_body["status"], "stopped");
    assert!(stopped_body["completed_at"].as_str().is_some());

    // A second stop reports not-found: the run already finalized.
    let again = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/runs/{run_id}/stop"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(again.status(), StatusCode::NOT_FOUND);

    // Finished runs still answer metrics from the stored descriptor.
    let metrics = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/runs/{run_id}/metrics"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(metrics.status(), StatusCode::OK);
    let metrics_body = body_json(metrics).await;
    assert_eq!(metrics_body["is_running"], json!(false));
    assert_eq!(metrics_body["stopped_by_circuit"], json!(false));
}
