//! Core domain types and traits for the Surge load-testing service.

pub mod auth;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod run;
pub mod sample;
pub mod target;
pub mod timeseries;
pub mod traits;

pub use auth::AuthSpec;
pub use error::{CoreError, CoreResult};
pub use ids::RunId;
pub use run::{RequestMethod, RunDescriptor, RunPlan, RunStatus};
pub use sample::{percentile, RequestSample};
pub use target::validate_target;
pub use timeseries::{series_from_samples, SeriesPoint};
pub use traits::{RunStore, SampleStore};
