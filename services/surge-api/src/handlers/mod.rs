//! HTTP handlers for the REST control surface.

pub mod health;
pub mod runs;

pub use health::{health_check, metrics_handler};
pub use runs::{
    get_historical_metrics, get_report, get_status, get_timeseries, list_history, list_running,
    live_metrics, start_run, stop_run, ApiError, ErrorResponse, StartRunResponse,
};
