use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Cadence at which the ramp re-evaluates its launch target.
const RAMP_TICK: Duration = Duration::from_millis(100);

/// Starts virtual users along a linear ramp from 0 to `total` over
/// `ramp_sec` seconds, then holds. With a zero ramp everyone starts at once.
///
/// `make_user` produces one user task per launch; tasks land in `tracker`
/// so the supervisor can join them on drain. The scheduler never launches
/// more than `total` users and stops immediately on cancellation.
pub async fn run_ramp<F, Fut>(
    total: u32,
    ramp_sec: u32,
    cancel: CancellationToken,
    tracker: TaskTracker,
    mut make_user: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    if total == 0 {
        return;
    }

    if ramp_sec == 0 {
        for _ in 0..total {
            tracker.spawn(make_user());
        }
        debug!(users = total, "all users started");
        return;
    }

    let started = Instant::now();
    let mut launched: u32 = 0;
    let mut ticker = tokio::time::interval(RAMP_TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let elapsed = started.elapsed().as_secs_f64();
        if elapsed >= f64::from(ramp_sec) {
            while launched < total {
                tracker.spawn(make_user());
                launched += 1;
            }
            debug!(users = total, "ramp complete");
            return;
        }

        let target = ((elapsed * f64::from(total)) / f64::from(ramp_sec)).floor() as u32;
        let target = target.min(total);
        while launched < target {
            tracker.spawn(make_user());
            launched += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn zero_ramp_starts_everyone_immediately() {
        let started = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let counter = Arc::clone(&started);
        run_ramp(8, 0, cancel, tracker.clone(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        tracker.close();
        tracker.wait().await;
        assert_eq!(started.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn ramp_is_monotonic_and_bounded() {
        let started = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let counter = Arc::clone(&started);
        let ramp = tokio::spawn(run_ramp(10, 1, cancel, tracker.clone(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                // Keep the task alive so the tracker sees concurrent users.
                tokio::time::sleep(Duration::from_millis(1_500)).await;
            }
        }));

        let mut previous = 0;
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(120)).await;
            let now = started.load(Ordering::SeqCst);
            assert!(now >= previous, "launch count must never decrease");
            assert!(now <= 10, "launch count must never exceed the plan");
            previous = now;
        }

        ramp.await.expect("ramp task");
        assert_eq!(started.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn cancellation_stops_launching() {
        let started = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let counter = Arc::clone(&started);
        let ramp = tokio::spawn(run_ramp(
            100,
            10,
            cancel.clone(),
            tracker.clone(),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        ));

        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();
        ramp.await.expect("ramp task");

        let after_cancel = started.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(started.load(Ordering::SeqCst), after_cancel);
        assert!(after_cancel < 100);
    }
}
