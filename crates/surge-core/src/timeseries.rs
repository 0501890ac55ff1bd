use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::sample::RequestSample;

/// One per-second point of a run's time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    /// Cumulative request count for live points, per-second count for
    /// reconstructed ones.
    pub requests: u64,
    pub rps: f64,
    pub avg_latency_ms: f64,
    /// Success percentage, 0-100.
    pub success_rate: f64,
}

#[derive(Default)]
struct Bucket {
    count: u64,
    success: u64,
    latency_sum: f64,
}

/// Rebuilds a per-second series from stored samples.
///
/// Samples are grouped by whole-second offset from `started_at` (negative
/// offsets clamp to zero); ties within a second keep their insertion order,
/// which the sample store already guarantees. Only non-empty seconds produce
/// points, so a run of D seconds yields at most D + 1 of them.
#[must_use]
pub fn series_from_samples(
    samples: &[RequestSample],
    started_at: DateTime<Utc>,
) -> Vec<SeriesPoint> {
    if samples.is_empty() {
        return Vec::new();
    }

    let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();
    for sample in samples {
        let offset = (sample.completed_at - started_at).num_seconds().max(0);
        let bucket = buckets.entry(offset).or_default();
        bucket.count += 1;
        bucket.latency_sum += sample.latency_ms;
        if sample.success {
            bucket.success += 1;
        }
    }

    buckets
        .into_iter()
        .map(|(offset, bucket)| SeriesPoint {
            timestamp: started_at + Duration::seconds(offset),
            requests: bucket.count,
            rps: bucket.count as f64,
            avg_latency_ms: bucket.latency_sum / bucket.count as f64,
            success_rate: 100.0 * bucket.success as f64 / bucket.count as f64,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(offset_ms: i64, latency_ms: f64, success: bool, started_at: DateTime<Utc>) -> RequestSample {
        RequestSample {
            run_key: 1,
            completed_at: started_at + Duration::milliseconds(offset_ms),
            latency_ms,
            success,
            status_code: if success { 200 } else { 500 },
        }
    }

    #[test]
    fn empty_samples_yield_empty_series() {
        assert!(series_from_samples(&[], Utc::now()).is_empty());
    }

    #[test]
    fn groups_by_whole_second_offset() {
        let start = Utc::now();
        let samples = vec![
            sample(100, 10.0, true, start),
            sample(900, 20.0, true, start),
            sample(1_500, 30.0, false, start),
            sample(3_200, 40.0, true, start),
        ];

        let series = series_from_samples(&samples, start);
        assert_eq!(series.len(), 3);

        assert_eq!(series[0].requests, 2);
        assert_eq!(series[0].avg_latency_ms, 15.0);
        assert_eq!(series[0].success_rate, 100.0);

        assert_eq!(series[1].requests, 1);
        assert_eq!(series[1].success_rate, 0.0);

        assert_eq!(series[2].timestamp, start + Duration::seconds(3));
    }

    #[test]
    fn clamps_samples_before_run_start_to_first_bucket() {
        let start = Utc::now();
        let samples = vec![sample(-400, 5.0, true, start), sample(200, 15.0, true, start)];

        let series = series_from_samples(&samples, start);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].requests, 2);
        assert_eq!(series[0].timestamp, start);
    }

    #[test]
    fn bucket_count_is_bounded_by_run_length() {
        let start = Utc::now();
        let duration_sec = 5i64;
        let samples: Vec<_> = (0..200)
            .map(|i| sample(i * (duration_sec * 1_000) / 200, 1.0, true, start))
            .collect();

        let series = series_from_samples(&samples, start);
        assert!(series.len() as i64 <= duration_sec + 1);
    }
}
