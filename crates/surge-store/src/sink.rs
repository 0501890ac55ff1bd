use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use surge_core::metrics::{SAMPLE_SINK_DROPPED_TOTAL, SAMPLE_WRITE_FAILURES_TOTAL};
use surge_core::{RequestSample, SampleStore};

/// Buffered samples held before the writer task persists them. Overflow is
/// dropped rather than blocking a virtual user; aggregate counters stay
/// authoritative regardless.
const SINK_CAPACITY: usize = 8_192;

/// Non-blocking fan-in point between virtual users and the sample store.
///
/// A single writer task drains the channel, so the store sees one writer no
/// matter how many users and runs publish concurrently. Write errors are
/// counted and logged, never surfaced to publishers.
pub struct SampleSink {
    tx: mpsc::Sender<RequestSample>,
}

impl SampleSink {
    /// Spawns the writer task and returns the sink plus its join handle.
    pub fn spawn(store: Arc<dyn SampleStore>) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<RequestSample>(SINK_CAPACITY);

        let writer = tokio::spawn(async move {
            while let Some(sample) = rx.recv().await {
                if let Err(err) = store.append(&sample).await {
                    SAMPLE_WRITE_FAILURES_TOTAL.inc();
                    warn!(
                        error = %err,
                        run_key = sample.run_key,
                        "failed to persist request sample"
                    );
                }
            }
        });

        (Arc::new(Self { tx }), writer)
    }

    /// Enqueues a sample without ever blocking the caller.
    pub fn publish(&self, sample: RequestSample) {
        match self.tx.try_send(sample) {
            Ok(()) => {}
            Err(TrySendError::Full(sample)) => {
                SAMPLE_SINK_DROPPED_TOTAL.inc();
                debug!(run_key = sample.run_key, "sample sink full, dropping sample");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("sample sink closed, dropping sample");
            }
        }
    }
}
