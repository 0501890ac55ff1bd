use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use surge_core::metrics::ACTIVE_RUNS;
use surge_core::timeseries::SeriesPoint;
use surge_core::{AuthSpec, RunDescriptor, RunId, RunStatus, RunStore};
use surge_store::SampleSink;

use crate::aggregator::{MetricsAggregator, MetricsSnapshot};
use crate::breaker::CircuitSupervisor;
use crate::ramp;
use crate::user::VirtualUser;

/// Upper bound for a single outbound request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long finalization waits for virtual users to drain. Users abort
/// in-flight work on cancellation, so in practice this is generous.
const DRAIN_TIMEOUT: Duration = REQUEST_TIMEOUT;

/// Shared collaborators a run needs while executing.
#[derive(Clone)]
pub struct RunContext {
    pub runs: Arc<dyn RunStore>,
    pub sink: Arc<SampleSink>,
    pub client: reqwest::Client,
}

/// Live state for one executing run. The supervisor task is the only writer
/// of lifecycle state; everyone else observes through the handle.
pub struct RunHandle {
    descriptor: RunDescriptor,
    auth: Option<AuthSpec>,
    aggregator: Arc<MetricsAggregator>,
    cancel: CancellationToken,
    is_running: AtomicBool,
    stop_requested: AtomicBool,
    tripped: Arc<AtomicBool>,
    finished_tx: watch::Sender<bool>,
    finished_rx: watch::Receiver<bool>,
}

impl RunHandle {
    /// Creates the handle for an admitted, persisted descriptor.
    #[must_use]
    pub fn new(descriptor: RunDescriptor, auth: Option<AuthSpec>) -> Arc<Self> {
        let (finished_tx, finished_rx) = watch::channel(false);
        Arc::new(Self {
            descriptor,
            auth,
            aggregator: Arc::new(MetricsAggregator::new()),
            cancel: CancellationToken::new(),
            is_running: AtomicBool::new(true),
            stop_requested: AtomicBool::new(false),
            tripped: Arc::new(AtomicBool::new(false)),
            finished_tx,
            finished_rx,
        })
    }

    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.descriptor.run_id
    }

    #[must_use]
    pub fn run_key(&self) -> i64 {
        self.descriptor.run_key
    }

    /// The descriptor as admitted (aggregates still zero).
    #[must_use]
    pub fn descriptor(&self) -> &RunDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stopped_by_circuit(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.aggregator.snapshot()
    }

    #[must_use]
    pub fn timeseries(&self) -> Vec<SeriesPoint> {
        self.aggregator.timeseries()
    }

    /// Descriptor with current counters merged in, for live status views.
    #[must_use]
    pub fn live_descriptor(&self) -> RunDescriptor {
        self.with_aggregates(self.descriptor.status, None)
    }

    /// Requests an external stop. Idempotent.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Resolves once finalization has completed.
    pub async fn wait_finished(&self) {
        let mut finished = self.finished_rx.clone();
        while !*finished.borrow() {
            if finished.changed().await.is_err() {
                return;
            }
        }
    }

    fn with_aggregates(
        &self,
        status: RunStatus,
        completed_at: Option<chrono::DateTime<Utc>>,
    ) -> RunDescriptor {
        let snap = self.aggregator.snapshot();
        let mut descriptor = self.descriptor.clone();
        descriptor.status = status;
        descriptor.completed_at = completed_at;
        descriptor.stopped_by_circuit = self.stopped_by_circuit();
        descriptor.total_requests = snap.total_requests;
        descriptor.success_count = snap.success_count;
        descriptor.error_count = snap.error_count;
        descriptor.avg_latency_ms = snap.avg_latency_ms;
        descriptor.min_latency_ms = snap.min_latency_ms;
        descriptor.max_latency_ms = snap.max_latency_ms;
        descriptor.rps = snap.rps;
        descriptor
    }

    fn final_descriptor(&self) -> RunDescriptor {
        let status = if self.stop_requested.load(Ordering::SeqCst) {
            RunStatus::Stopped
        } else {
            RunStatus::Completed
        };
        self.with_aggregates(status, Some(Utc::now()))
    }
}

/// Owns a run's lifecycle: launches the sampler, ramp, and circuit breaker
/// under one cancellation scope, enforces the deadline, and finalizes
/// exactly once.
pub struct RunSupervisor;

impl RunSupervisor {
    /// Spawns the supervision task for a prepared handle. `on_finalize`
    /// runs after the terminal descriptor has been persisted (registry and
    /// admission-slot cleanup live there).
    pub fn launch(
        ctx: RunContext,
        handle: Arc<RunHandle>,
        on_finalize: Option<Box<dyn FnOnce() + Send>>,
    ) {
        ACTIVE_RUNS.inc();
        tokio::spawn(Self::supervise(ctx, handle, on_finalize));
    }

    async fn supervise(
        ctx: RunContext,
        handle: Arc<RunHandle>,
        on_finalize: Option<Box<dyn FnOnce() + Send>>,
    ) {
        let cancel = handle.cancel.clone();
        let sampler = handle.aggregator.spawn_sampler(cancel.clone());

        let breaker = tokio::spawn(
            CircuitSupervisor::new(
                Arc::clone(&handle.aggregator),
                handle.descriptor.error_threshold,
                cancel.clone(),
                Arc::clone(&handle.tripped),
            )
            .run(),
        );

        let tracker = TaskTracker::new();
        let ramp_task = {
            let descriptor = &handle.descriptor;
            let prototype = VirtualUser::new(
                ctx.client.clone(),
                descriptor.target.clone(),
                descriptor.method,
                descriptor.body.clone(),
                descriptor.headers.clone(),
                handle.auth.clone(),
                descriptor.tick_interval(),
                descriptor.run_key,
                Arc::clone(&handle.aggregator),
                Arc::clone(&ctx.sink),
                cancel.clone(),
            );
            tokio::spawn(ramp::run_ramp(
                descriptor.users,
                descriptor.ramp_sec,
                cancel.clone(),
                tracker.clone(),
                move || prototype.clone().run(),
            ))
        };

        let deadline = Duration::from_secs(u64::from(handle.descriptor.duration_sec));
        tokio::select! {
            () = tokio::time::sleep(deadline) => {}
            () = cancel.cancelled() => {}
        }
        cancel.cancel();

        // The ramp stops spawning before the tracker closes, so the drain
        // below sees every user task.
        let _ = ramp_task.await;
        tracker.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, tracker.wait())
            .await
            .is_err()
        {
            warn!(run_id = %handle.run_id(), "virtual users did not drain in time");
        }
        let _ = sampler.await;
        let _ = breaker.await;

        let final_descriptor = handle.final_descriptor();
        if let Err(err) = ctx.runs.finalize(&final_descriptor).await {
            error!(
                error = %err,
                run_id = %handle.run_id(),
                "failed to persist final run state"
            );
        }

        handle.is_running.store(false, Ordering::SeqCst);
        ACTIVE_RUNS.dec();
        if let Some(hook) = on_finalize {
            hook();
        }
        let _ = handle.finished_tx.send(true);

        info!(
            run_id = %handle.run_id(),
            status = final_descriptor.status.as_str(),
            total = final_descriptor.total_requests,
            errors = final_descriptor.error_count,
            stopped_by_circuit = final_descriptor.stopped_by_circuit,
            "run finalized"
        );
    }
}
