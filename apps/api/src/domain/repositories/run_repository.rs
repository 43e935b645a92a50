use async_trait::async_trait;
use uuid::Uuid;
use crate::domain::run::Run;

/// Repository trait for Run aggregate
///
/// Defines the contract for persisting and retrieving runs.
/// Implementations should handle database-specific details.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Save a run (insert or update)
    async fn save(&self, run: &Run) -> Result<(), String>;

    /// Find a run by its ID
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Run>, String>;

    /// Find all runs for a project, newest first
    async fn find_by_project(&self, project_id: Uuid) -> Result<Vec<Run>, String>;

    /// Delete a run by ID
    async fn delete(&self, id: Uuid) -> Result<(), String>;
}
