//! Application state shared across handlers.

use arbor_core::config::AppConfig;
use arbor_pipeline::Pipeline;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration, loaded once at startup.
    pub config: Arc<AppConfig>,
    pub pipeline: Pipeline,
}

impl AppState {
    pub fn new(config: AppConfig, pipeline: Pipeline) -> Self {
        Self {
            config: Arc::new(config),
            pipeline,
        }
    }
}
