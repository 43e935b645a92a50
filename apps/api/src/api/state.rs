use std::sync::Arc;

use crate::agents::Orchestrator;
use crate::domain::repositories::{ActivityRepository, RunRepository};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub runs: Arc<dyn RunRepository>,
    pub activity: Arc<dyn ActivityRepository>,
}

impl AppState {
    pub fn new(
        orchestrator: Orchestrator,
        runs: Arc<dyn RunRepository>,
        activity: Arc<dyn ActivityRepository>,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            runs,
            activity,
        }
    }
}
