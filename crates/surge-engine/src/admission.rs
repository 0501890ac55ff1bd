use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use surge_core::{CoreError, CoreResult};

/// Maximum concurrently active runs across all callers.
pub const GLOBAL_ACTIVE_LIMIT: usize = 50;

/// Maximum concurrently active runs per caller.
pub const PER_CALLER_ACTIVE_LIMIT: usize = 3;

/// Minimum spacing between successful starts from one caller.
pub const START_COOLDOWN: Duration = Duration::from_secs(5);

/// Cadence of the stale-entry pruner.
const PRUNE_INTERVAL: Duration = Duration::from_secs(600);

/// Last-start entries older than this are discarded.
const STALE_AFTER: Duration = Duration::from_secs(3_600);

#[derive(Default)]
struct ActiveCounts {
    total: usize,
    by_caller: HashMap<String, usize>,
}

/// Gatekeeper for run starts: per-caller start-rate limiting plus global and
/// per-caller active caps.
///
/// `begin` reserves a slot and must be paired with either `commit` (the run
/// launched; the caller's cooldown starts) or `release` (validation or
/// persistence failed; the slot returns and no cooldown is recorded).
/// `release` is called again when a run finalizes.
pub struct AdmissionController {
    last_starts: Mutex<HashMap<String, Instant>>,
    active: Mutex<ActiveCounts>,
}

impl AdmissionController {
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            last_starts: Mutex::new(HashMap::new()),
            active: Mutex::new(ActiveCounts::default()),
        }
    }

    /// Checks the start rate and both caps, reserving an active slot on
    /// success.
    ///
    /// # Errors
    ///
    /// `CoreError::RateLimited` within the cooldown window,
    /// `CoreError::CapacityExceeded` when a cap is full.
    pub fn begin(&self, caller: &str) -> CoreResult<()> {
        {
            let last_starts = self.last_starts.lock();
            if let Some(last) = last_starts.get(caller) {
                if last.elapsed() < START_COOLDOWN {
                    return Err(CoreError::rate_limited(format!(
                        "wait {} seconds between run starts",
                        START_COOLDOWN.as_secs()
                    )));
                }
            }
        }

        let mut active = self.active.lock();
        if active.total >= GLOBAL_ACTIVE_LIMIT {
            return Err(CoreError::capacity_exceeded(format!(
                "maximum of {GLOBAL_ACTIVE_LIMIT} concurrent runs reached"
            )));
        }

        let count = active.by_caller.entry(caller.to_string()).or_insert(0);
        if *count >= PER_CALLER_ACTIVE_LIMIT {
            return Err(CoreError::capacity_exceeded(format!(
                "maximum of {PER_CALLER_ACTIVE_LIMIT} concurrent runs per caller reached"
            )));
        }

        *count += 1;
        active.total += 1;
        Ok(())
    }

    /// Records a successful start for the caller's cooldown. Rejected
    /// requests never reach this, so they do not consume the budget.
    pub fn commit(&self, caller: &str) {
        self.last_starts
            .lock()
            .insert(caller.to_string(), Instant::now());
    }

    /// Returns a slot reserved by `begin`.
    pub fn release(&self, caller: &str) {
        let mut active = self.active.lock();
        active.total = active.total.saturating_sub(1);
        if let Some(count) = active.by_caller.get_mut(caller) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                active.by_caller.remove(caller);
            }
        }
    }

    /// Currently reserved slots across all callers.
    #[must_use]
    pub fn active_runs(&self) -> usize {
        self.active.lock().total
    }

    /// Drops last-start entries older than an hour.
    pub fn prune_stale(&self) {
        let mut last_starts = self.last_starts.lock();
        let before = last_starts.len();
        last_starts.retain(|_, started| started.elapsed() < STALE_AFTER);
        let removed = before - last_starts.len();
        if removed > 0 {
            debug!(removed, "pruned stale rate-limit entries");
        }
    }

    /// Spawns the periodic pruner; exits on cancellation.
    pub fn spawn_pruner(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let admission = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = ticker.tick() => admission.prune_stale(),
                }
            }
        })
    }
}
