use std::sync::Arc;

use surge_engine::RunService;

/// Shared application state for the REST facade.
#[derive(Clone)]
pub struct AppState {
    /// The engine front door: admission, registry, and run lifecycle.
    pub service: Arc<RunService>,
}

impl AppState {
    #[must_use]
    pub fn new(service: Arc<RunService>) -> Self {
        Self { service }
    }
}
