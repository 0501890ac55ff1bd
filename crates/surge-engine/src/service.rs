use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use surge_core::metrics::RUNS_STARTED_TOTAL;
use surge_core::{
    validate_target, CoreError, CoreResult, RunDescriptor, RunId, RunPlan, RunStore, SampleStore,
};
use surge_store::SampleSink;

use crate::admission::AdmissionController;
use crate::supervisor::{RunContext, RunHandle, RunSupervisor, REQUEST_TIMEOUT};

/// Budget for cancelling and finalizing every active run on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra slack on top of the drain bound when a stop waits for
/// finalization.
const STOP_WAIT_TIMEOUT: Duration = Duration::from_secs(35);

/// Front door of the engine: admits start requests, persists descriptors,
/// launches supervisors, and tracks the live-run registry.
pub struct RunService {
    runs: Arc<dyn RunStore>,
    samples: Arc<dyn SampleStore>,
    sink: Arc<SampleSink>,
    admission: Arc<AdmissionController>,
    registry: RwLock<HashMap<RunId, Arc<RunHandle>>>,
    client: reqwest::Client,
    shutdown: CancellationToken,
}

impl RunService {
    /// Builds the service and starts its background pruner.
    ///
    /// # Errors
    ///
    /// Fails when the shared HTTP client cannot be constructed.
    pub fn new(
        runs: Arc<dyn RunStore>,
        samples: Arc<dyn SampleStore>,
        sink: Arc<SampleSink>,
    ) -> CoreResult<Arc<Self>> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| CoreError::internal(format!("failed to build HTTP client: {err}")))?;

        let admission = Arc::new(AdmissionController::new());
        let shutdown = CancellationToken::new();
        let _pruner = admission.spawn_pruner(shutdown.clone());

        Ok(Arc::new(Self {
            runs,
            samples,
            sink,
            admission,
            registry: RwLock::new(HashMap::new()),
            client,
            shutdown,
        }))
    }

    #[must_use]
    pub fn run_store(&self) -> Arc<dyn RunStore> {
        Arc::clone(&self.runs)
    }

    #[must_use]
    pub fn sample_store(&self) -> Arc<dyn SampleStore> {
        Arc::clone(&self.samples)
    }

    #[must_use]
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Admits, persists, and launches a run. Returns the opaque id and the
    /// internal key.
    ///
    /// # Errors
    ///
    /// Rate-limit and capacity errors from admission, parameter and target
    /// rejections from validation, and storage errors when the initial
    /// descriptor cannot be persisted (which is fatal to the start).
    pub async fn start_run(
        self: &Arc<Self>,
        caller: &str,
        plan: RunPlan,
    ) -> CoreResult<(RunId, i64)> {
        self.admission.begin(caller)?;

        match self.start_admitted(caller, plan).await {
            Ok(out) => {
                self.admission.commit(caller);
                RUNS_STARTED_TOTAL.inc();
                Ok(out)
            }
            Err(err) => {
                self.admission.release(caller);
                Err(err)
            }
        }
    }

    async fn start_admitted(
        self: &Arc<Self>,
        caller: &str,
        mut plan: RunPlan,
    ) -> CoreResult<(RunId, i64)> {
        plan.validate()?;
        plan.target = validate_target(&plan.target)?;

        let run_id = RunId::new();
        let mut descriptor = RunDescriptor::from_plan(&plan, run_id, Utc::now());
        descriptor.run_key = self.runs.insert(&descriptor).await?;
        let run_key = descriptor.run_key;

        let handle = RunHandle::new(descriptor, plan.auth);
        self.registry.write().await.insert(run_id, Arc::clone(&handle));

        let ctx = RunContext {
            runs: Arc::clone(&self.runs),
            sink: Arc::clone(&self.sink),
            client: self.client.clone(),
        };
        let service = Arc::clone(self);
        let caller = caller.to_string();
        let on_finalize: Box<dyn FnOnce() + Send> = Box::new(move || {
            service.admission.release(&caller);
            tokio::spawn(async move {
                service.registry.write().await.remove(&run_id);
            });
        });
        RunSupervisor::launch(ctx, handle, Some(on_finalize));

        info!(
            %run_id,
            target = %plan.target,
            users = plan.users,
            duration_sec = plan.duration_sec,
            "run started"
        );
        Ok((run_id, run_key))
    }

    /// Handle for a run that has not finalized yet.
    pub async fn live_handle(&self, run_id: RunId) -> Option<Arc<RunHandle>> {
        self.registry.read().await.get(&run_id).cloned()
    }

    /// Active runs ordered by start time.
    pub async fn list_running(&self) -> Vec<Arc<RunHandle>> {
        let mut handles: Vec<Arc<RunHandle>> =
            self.registry.read().await.values().cloned().collect();
        handles.sort_by_key(|handle| handle.descriptor().started_at);
        handles
    }

    /// Stops an active run and returns its finalized descriptor. A run that
    /// already finalized is reported as not found.
    ///
    /// # Errors
    ///
    /// `CoreError::NotFound` for unknown or already-finalized runs; storage
    /// errors when the final descriptor cannot be read back.
    pub async fn stop_run(&self, run_id: RunId) -> CoreResult<RunDescriptor> {
        let handle = self
            .live_handle(run_id)
            .await
            .ok_or_else(|| CoreError::not_found("run", run_id.to_string()))?;

        handle.request_stop();
        if tokio::time::timeout(STOP_WAIT_TIMEOUT, handle.wait_finished())
            .await
            .is_err()
        {
            warn!(%run_id, "stop timed out waiting for finalization");
        }

        // Drop the registry entry here rather than racing the supervisor's
        // deferred cleanup; repeated stops must observe not-found.
        self.registry.write().await.remove(&run_id);

        self.runs
            .get(run_id)
            .await?
            .ok_or_else(|| CoreError::not_found("run", run_id.to_string()))
    }

    /// Cancels every active run and waits for finalization, bounded by the
    /// shutdown budget.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let handles: Vec<Arc<RunHandle>> =
            self.registry.read().await.values().cloned().collect();
        if handles.is_empty() {
            return;
        }

        info!(count = handles.len(), "stopping active runs");
        for handle in &handles {
            handle.request_stop();
        }

        let drain = async {
            for handle in &handles {
                handle.wait_finished().await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
            warn!("some runs did not finalize before the shutdown deadline");
        }
    }
}
