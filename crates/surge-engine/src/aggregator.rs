use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use surge_core::sample::percentile;
use surge_core::timeseries::SeriesPoint;

/// Most recent latency samples kept for live percentile estimates. A sliding
/// window rather than a random reservoir: live charts should reflect recent
/// behavior, not the whole run.
pub const RESERVOIR_CAPACITY: usize = 10_000;

/// Rolling one-second points kept in memory (one hour at 1 Hz).
pub const SERIES_CAPACITY: usize = 3_600;

/// Trailing samples feeding the per-second average latency.
const ROLLING_LATENCY_WINDOW: usize = 100;

struct Window {
    latencies: VecDeque<f64>,
    series: VecDeque<SeriesPoint>,
    last_total: u64,
    last_tick: Instant,
}

/// Live metrics state for one run.
///
/// Counters are lock-free; the latency reservoir and the rolling ring share
/// one read-write mutex. Writers (`record`, the sampler) take it exclusively
/// for short appends; readers copy out under the shared lock and sort or
/// format only after releasing it.
pub struct MetricsAggregator {
    total: AtomicU64,
    success: AtomicU64,
    error: AtomicU64,
    window: RwLock<Window>,
    started_instant: Instant,
}

/// Point-in-time read of aggregator state safe for external consumption.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    /// Failed percentage of all completed requests, 0-100.
    pub error_rate: f64,
    /// Whole-run requests per second (total / elapsed).
    pub rps: f64,
    /// Mean of the per-second rps points collected so far.
    pub rolling_avg_rps: f64,
    pub elapsed_seconds: f64,
}

impl MetricsAggregator {
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            success: AtomicU64::new(0),
            error: AtomicU64::new(0),
            window: RwLock::new(Window {
                latencies: VecDeque::with_capacity(RESERVOIR_CAPACITY),
                series: VecDeque::new(),
                last_total: 0,
                last_tick: Instant::now(),
            }),
            started_instant: Instant::now(),
        }
    }

    /// Records one completed request. Status codes beyond the success flag
    /// are not aggregated here; the sample stream keeps them.
    pub fn record(&self, latency_ms: f64, success: bool, _status: u16) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.error.fetch_add(1, Ordering::Relaxed);
        }

        let mut window = self.window.write();
        if window.latencies.len() == RESERVOIR_CAPACITY {
            window.latencies.pop_front();
        }
        window.latencies.push_back(latency_ms);
    }

    /// Current counter values: (total, success, error).
    #[must_use]
    pub fn totals(&self) -> (u64, u64, u64) {
        (
            self.total.load(Ordering::Relaxed),
            self.success.load(Ordering::Relaxed),
            self.error.load(Ordering::Relaxed),
        )
    }

    #[must_use]
    pub fn elapsed_seconds(&self) -> f64 {
        self.started_instant.elapsed().as_secs_f64()
    }

    /// Builds a consistent snapshot. Sorting happens on a copy after the
    /// shared lock is released.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (total, success, error) = self.totals();

        let (mut latencies, rolling_avg_rps) = {
            let window = self.window.read();
            let latencies: Vec<f64> = window.latencies.iter().copied().collect();
            let rolling_avg_rps = if window.series.is_empty() {
                0.0
            } else {
                window.series.iter().map(|p| p.rps).sum::<f64>() / window.series.len() as f64
            };
            (latencies, rolling_avg_rps)
        };

        latencies.sort_unstable_by(f64::total_cmp);

        let (min, max, avg) = if latencies.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let sum: f64 = latencies.iter().sum();
            (
                latencies[0],
                latencies[latencies.len() - 1],
                sum / latencies.len() as f64,
            )
        };

        let elapsed = self.elapsed_seconds();
        let rps = if elapsed > 0.0 {
            total as f64 / elapsed
        } else {
            0.0
        };
        let error_rate = if total > 0 {
            100.0 * error as f64 / total as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            total_requests: total,
            success_count: success,
            error_count: error,
            min_latency_ms: min,
            max_latency_ms: max,
            avg_latency_ms: avg,
            p50_latency_ms: percentile(&latencies, 50),
            p95_latency_ms: percentile(&latencies, 95),
            p99_latency_ms: percentile(&latencies, 99),
            error_rate,
            rps,
            rolling_avg_rps,
            elapsed_seconds: elapsed,
        }
    }

    /// Copy of the rolling per-second ring.
    #[must_use]
    pub fn timeseries(&self) -> Vec<SeriesPoint> {
        self.window.read().series.iter().cloned().collect()
    }

    /// Spawns the once-per-second sampler feeding the rolling ring. Exits on
    /// cancellation.
    pub fn spawn_sampler(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let aggregator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first interval tick completes immediately; the ring wants
            // points one second apart.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = ticker.tick() => aggregator.sample_tick(),
                }
            }
        })
    }

    fn sample_tick(&self) {
        let total = self.total.load(Ordering::Relaxed);
        let success = self.success.load(Ordering::Relaxed);

        let mut window = self.window.write();
        let elapsed = window.last_tick.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }

        let rps = (total - window.last_total) as f64 / elapsed;

        let tail_len = window.latencies.len().min(ROLLING_LATENCY_WINDOW);
        let avg_latency_ms = if tail_len == 0 {
            0.0
        } else {
            window.latencies.iter().rev().take(tail_len).sum::<f64>() / tail_len as f64
        };

        let success_rate = if total > 0 {
            100.0 * success as f64 / total as f64
        } else {
            0.0
        };

        if window.series.len() == SERIES_CAPACITY {
            window.series.pop_front();
        }
        window.series.push_back(SeriesPoint {
            timestamp: Utc::now(),
            requests: total,
            rps,
            avg_latency_ms,
            success_rate,
        });

        window.last_total = total;
        window.last_tick = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_split_by_outcome() {
        let agg = MetricsAggregator::new();
        agg.record(10.0, true, 200);
        agg.record(20.0, true, 204);
        agg.record(30.0, false, 500);

        let (total, success, error) = agg.totals();
        assert_eq!(total, 3);
        assert_eq!(success, 2);
        assert_eq!(error, 1);
        assert_eq!(total, success + error);
    }

    #[test]
    fn reservoir_is_bounded_and_slides() {
        let agg = MetricsAggregator::new();
        for i in 0..(RESERVOIR_CAPACITY + 500) {
            agg.record(i as f64, true, 200);
        }

        let window = agg.window.read();
        assert_eq!(window.latencies.len(), RESERVOIR_CAPACITY);
        // Oldest samples were evicted; the window starts at 500.
        assert_eq!(window.latencies.front().copied(), Some(500.0));
        assert_eq!(
            window.latencies.back().copied(),
            Some((RESERVOIR_CAPACITY + 499) as f64)
        );
    }

    #[test]
    fn snapshot_orders_latency_stats() {
        let agg = MetricsAggregator::new();
        for latency in [80.0, 5.0, 200.0, 14.0, 90.0, 33.0] {
            agg.record(latency, true, 200);
        }

        let snap = agg.snapshot();
        assert_eq!(snap.min_latency_ms, 5.0);
        assert_eq!(snap.max_latency_ms, 200.0);
        assert!(snap.min_latency_ms <= snap.avg_latency_ms);
        assert!(snap.avg_latency_ms <= snap.max_latency_ms);
        assert!(snap.p50_latency_ms <= snap.p95_latency_ms);
        assert!(snap.p95_latency_ms <= snap.p99_latency_ms);
    }

    #[test]
    fn empty_snapshot_is_all_zero() {
        let snap = MetricsAggregator::new().snapshot();
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.min_latency_ms, 0.0);
        assert_eq!(snap.p99_latency_ms, 0.0);
        assert_eq!(snap.error_rate, 0.0);
    }

    #[test]
    fn sample_tick_appends_ring_points_with_deltas() {
        let agg = MetricsAggregator::new();
        for _ in 0..10 {
            agg.record(10.0, true, 200);
        }
        std::thread::sleep(Duration::from_millis(20));
        agg.sample_tick();

        for _ in 0..5 {
            agg.record(20.0, false, 500);
        }
        std::thread::sleep(Duration::from_millis(20));
        agg.sample_tick();

        let series = agg.timeseries();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].requests, 10);
        assert_eq!(series[1].requests, 15);
        assert!(series[0].rps > 0.0);
        // Cumulative success rate after 10 ok + 5 failed.
        assert!((series[1].success_rate - 100.0 * 10.0 / 15.0).abs() < 0.01);
    }

    #[test]
    fn ring_is_bounded() {
        let agg = MetricsAggregator::new();
        for _ in 0..(SERIES_CAPACITY + 25) {
            agg.record(1.0, true, 200);
            std::thread::sleep(Duration::from_nanos(1));
            agg.sample_tick();
        }
        assert_eq!(agg.timeseries().len(), SERIES_CAPACITY);
    }

    #[tokio::test]
    async fn sampler_exits_on_cancellation() {
        let agg = Arc::new(MetricsAggregator::new());
        let cancel = CancellationToken::new();
        let handle = agg.spawn_sampler(cancel.clone());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sampler stopped")
            .expect("sampler task");
    }
}
