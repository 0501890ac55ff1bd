use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::aggregator::MetricsAggregator;

/// How often the breaker reads the aggregator.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Completed requests required before the error rate is trusted. Suppresses
/// early noise where a handful of transport errors would cross any
/// threshold.
pub const WARMUP_FLOOR: u64 = 10;

/// Watches a run's error rate and cancels it once the configured threshold
/// is crossed.
pub struct CircuitSupervisor {
    aggregator: Arc<MetricsAggregator>,
    /// Threshold in percent; values <= 0 deactivate the supervisor.
    threshold: f64,
    cancel: CancellationToken,
    tripped: Arc<AtomicBool>,
}

impl CircuitSupervisor {
    pub fn new(
        aggregator: Arc<MetricsAggregator>,
        threshold: f64,
        cancel: CancellationToken,
        tripped: Arc<AtomicBool>,
    ) -> Self {
        Self {
            aggregator,
            threshold,
            cancel,
            tripped,
        }
    }

    /// Polls until the run is cancelled or the threshold is crossed.
    pub async fn run(self) {
        if self.threshold <= 0.0 {
            return;
        }

        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let (total, _, error) = self.aggregator.totals();
            if total < WARMUP_FLOOR {
                continue;
            }

            let error_rate = 100.0 * error as f64 / total as f64;
            if error_rate >= self.threshold {
                warn!(
                    error_rate = format!("{error_rate:.2}"),
                    threshold = self.threshold,
                    "error threshold crossed, stopping run"
                );
                self.tripped.store(true, Ordering::SeqCst);
                self.cancel.cancel();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(
        aggregator: &Arc<MetricsAggregator>,
        threshold: f64,
    ) -> (CircuitSupervisor, CancellationToken, Arc<AtomicBool>) {
        let cancel = CancellationToken::new();
        let tripped = Arc::new(AtomicBool::new(false));
        (
            CircuitSupervisor::new(
                Arc::clone(aggregator),
                threshold,
                cancel.clone(),
                Arc::clone(&tripped),
            ),
            cancel,
            tripped,
        )
    }

    #[tokio::test]
    async fn disabled_threshold_returns_immediately() {
        let aggregator = Arc::new(MetricsAggregator::new());
        let (supervisor, cancel, tripped) = breaker(&aggregator, 0.0);

        tokio::time::timeout(Duration::from_millis(100), supervisor.run())
            .await
            .expect("inactive breaker exits at once");
        assert!(!tripped.load(Ordering::SeqCst));
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn trips_once_warmup_floor_and_threshold_are_crossed() {
        let aggregator = Arc::new(MetricsAggregator::new());
        for _ in 0..12 {
            aggregator.record(5.0, false, 500);
        }

        let (supervisor, cancel, tripped) = breaker(&aggregator, 50.0);
        let task = tokio::spawn(supervisor.run());

        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("breaker finished")
            .expect("breaker task");
        assert!(tripped.load(Ordering::SeqCst));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn stays_quiet_below_warmup_floor() {
        let aggregator = Arc::new(MetricsAggregator::new());
        for _ in 0..5 {
            aggregator.record(5.0, false, 500);
        }

        let (supervisor, cancel, tripped) = breaker(&aggregator, 50.0);
        let task = tokio::spawn(supervisor.run());

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(!tripped.load(Ordering::SeqCst));

        cancel.cancel();
        task.await.expect("breaker task");
        assert!(!tripped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_error_rate_does_not_trip() {
        let aggregator = Arc::new(MetricsAggregator::new());
        for i in 0..100 {
            aggregator.record(5.0, i % 10 != 0, if i % 10 == 0 { 500 } else { 200 });
        }

        let (supervisor, cancel, tripped) = breaker(&aggregator, 50.0);
        let task = tokio::spawn(supervisor.run());

        tokio::time::sleep(Duration::from_secs(9)).await;
        cancel.cancel();
        task.await.expect("breaker task");
        assert!(!tripped.load(Ordering::SeqCst));
    }
}
