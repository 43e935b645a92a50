use async_trait::async_trait;

use crate::agents::recovery::LearnedPattern;

/// Durable store for learned recovery patterns
#[async_trait]
pub trait PatternRepository: Send + Sync {
    /// Insert or replace the pattern for its `(error_type, role)` key
    async fn save(&self, pattern: &LearnedPattern) -> Result<(), String>;

    async fn find_all(&self) -> Result<Vec<LearnedPattern>, String>;
}
