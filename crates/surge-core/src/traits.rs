use async_trait::async_trait;

use crate::error::CoreResult;
use crate::ids::RunId;
use crate::run::RunDescriptor;
use crate::sample::RequestSample;

/// Durable store for run descriptors.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persists a new descriptor and returns its internal sequential key.
    async fn insert(&self, run: &RunDescriptor) -> CoreResult<i64>;

    /// Writes terminal status, completion time, and aggregate totals for a
    /// finished run.
    async fn finalize(&self, run: &RunDescriptor) -> CoreResult<()>;

    /// Fetches a run by its opaque identifier.
    async fn get(&self, run_id: RunId) -> CoreResult<Option<RunDescriptor>>;

    /// Most recent runs ordered by start time descending.
    async fn list_recent(&self, limit: u32) -> CoreResult<Vec<RunDescriptor>>;
}

/// Durable, append-only store for request samples.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Appends one sample. Callers treat failures as lossy, not fatal.
    async fn append(&self, sample: &RequestSample) -> CoreResult<()>;

    /// All samples for a run ordered by completion timestamp ascending,
    /// insertion order within ties.
    async fn for_run(&self, run_key: i64) -> CoreResult<Vec<RequestSample>>;

    /// Number of stored samples for a run.
    async fn count_for_run(&self, run_key: i64) -> CoreResult<u64>;
}
