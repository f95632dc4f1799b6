pub mod dashboard;
pub mod forecast;
pub mod health;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::LivePipeline;

/// Shared application state for all endpoints.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<AppConfig>,
    /// The forecast pipeline, or why it could not be set up at startup.
    pub(crate) forecaster: Result<Arc<LivePipeline>, String>,
}
