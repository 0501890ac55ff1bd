use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single request issued by a virtual user. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSample {
    /// Internal key of the owning run.
    pub run_key: i64,
    /// Wall-clock completion time.
    pub completed_at: DateTime<Utc>,
    pub latency_ms: f64,
    /// True iff the transport succeeded and the HTTP status was < 400.
    pub success: bool,
    /// Numeric status code; 0 when the transport failed.
    pub status_code: u16,
}

/// Latency percentile over an ascending-sorted slice.
///
/// Picks the element at index `floor(len * pct / 100)`, 0.0 for an empty
/// slice. Recomputed from a fresh copy on every snapshot; results are never
/// cached.
#[must_use]
pub fn percentile(sorted: &[f64], pct: u8) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = sorted.len() * usize::from(pct) / 100;
    sorted[idx.min(sorted.len() - 1)]
}
