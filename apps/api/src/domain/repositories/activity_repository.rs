use async_trait::async_trait;
use uuid::Uuid;
use crate::agents::events::ActivityEvent;

/// Append-only store for run activity events
#[async_trait]
pub trait ActivityRepository: Send + Sync {
    async fn record(&self, event: &ActivityEvent) -> Result<(), String>;

    /// Events for a run in emission order
    async fn find_by_run(&self, run_id: Uuid) -> Result<Vec<ActivityEvent>, String>;
}
