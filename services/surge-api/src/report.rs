//! Summary report assembly.
//!
//! Produces a structured document with everything a renderer needs; turning
//! it into a PDF or a page is a downstream concern.

use chrono::{DateTime, Utc};
use serde::Serialize;

use surge_core::{percentile, series_from_samples, RequestSample, RunDescriptor, SeriesPoint};
use surge_engine::MetricsSnapshot;

/// Renderable summary of one run.
#[derive(Debug, Serialize)]
pub struct ReportDocument {
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub run: RunDescriptor,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub error_rate: f64,
    pub time_series: Vec<SeriesPoint>,
}

impl ReportDocument {
    /// Report for a finished run, rebuilt from the stored sample stream.
    #[must_use]
    pub fn from_samples(run: RunDescriptor, samples: &[RequestSample]) -> Self {
        let (p50, p95, p99) = latency_percentiles(samples);
        let time_series = series_from_samples(samples, run.started_at);
        let error_rate = run.error_rate();

        Self {
            title: format!("Load test report - {}", run.run_id),
            generated_at: Utc::now(),
            run,
            p50_latency_ms: p50,
            p95_latency_ms: p95,
            p99_latency_ms: p99,
            error_rate,
            time_series,
        }
    }

    /// Report for an active run, straight from its live aggregator.
    #[must_use]
    pub fn from_live(
        run: RunDescriptor,
        snapshot: &MetricsSnapshot,
        time_series: Vec<SeriesPoint>,
    ) -> Self {
        Self {
            title: format!("Load test report - {}", run.run_id),
            generated_at: Utc::now(),
            run,
            p50_latency_ms: snapshot.p50_latency_ms,
            p95_latency_ms: snapshot.p95_latency_ms,
            p99_latency_ms: snapshot.p99_latency_ms,
            error_rate: snapshot.error_rate,
            time_series,
        }
    }
}

/// p50/p95/p99 over a complete sample stream.
pub(crate) fn latency_percentiles(samples: &[RequestSample]) -> (f64, f64, f64) {
    let mut latencies: Vec<f64> = samples.iter().map(|s| s.latency_ms).collect();
    latencies.sort_unstable_by(f64::total_cmp);
    (
        percentile(&latencies, 50),
        percentile(&latencies, 95),
        percentile(&latencies, 99),
    )
}
