// In-process repositories
//
// Used when no DATABASE_URL is configured and by the integration tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agents::events::ActivityEvent;
use crate::agents::recovery::LearnedPattern;
use crate::agents::types::AgentRole;
use crate::domain::repositories::{ActivityRepository, PatternRepository, RunRepository};
use crate::domain::run::Run;

#[derive(Default)]
pub struct InMemoryRunRepository {
    runs: DashMap<Uuid, Run>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn save(&self, run: &Run) -> Result<(), String> {
        self.runs.insert(run.id(), run.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Run>, String> {
        Ok(self.runs.get(&id).map(|r| r.value().clone()))
    }

    async fn find_by_project(&self, project_id: Uuid) -> Result<Vec<Run>, String> {
        let mut runs: Vec<Run> = self
            .runs
            .iter()
            .filter(|r| r.project_id() == project_id)
            .map(|r| r.value().clone())
            .collect();
        runs.sort_by_key(|r| std::cmp::Reverse(r.created_at()));
        Ok(runs)
    }

    async fn delete(&self, id: Uuid) -> Result<(), String> {
        self.runs
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| format!("Run not found: {}", id))
    }
}

/// Events kept before the oldest are dropped
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 10_000;

pub struct InMemoryActivityRepository {
    events: RwLock<VecDeque<ActivityEvent>>,
    capacity: usize,
}

impl Default for InMemoryActivityRepository {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ACTIVITY_CAPACITY)
    }
}

impl InMemoryActivityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }
}

#[async_trait]
impl ActivityRepository for InMemoryActivityRepository {
    async fn record(&self, event: &ActivityEvent) -> Result<(), String> {
        let mut events = self.events.write().await;
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        Ok(())
    }

    async fn find_by_run(&self, run_id: Uuid) -> Result<Vec<ActivityEvent>, String> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryPatternRepository {
    patterns: DashMap<(String, AgentRole), LearnedPattern>,
}

impl InMemoryPatternRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PatternRepository for InMemoryPatternRepository {
    async fn save(&self, pattern: &LearnedPattern) -> Result<(), String> {
        self.patterns
            .insert((pattern.error_type.clone(), pattern.role), pattern.clone());
        Ok(())
    }

    async fn find_all(&self) -> Result<Vec<LearnedPattern>, String> {
        Ok(self.patterns.iter().map(|p| p.value().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::events::ActivityKind;
    use crate::agents::recovery::RecoveryStrategy;

    #[tokio::test]
    async fn run_round_trip_and_delete() {
        let repo = InMemoryRunRepository::new();
        let project_id = Uuid::new_v4();
        let (run, _) = Run::new(project_id, "Write docs".to_string()).unwrap();

        repo.save(&run).await.unwrap();
        let found = repo.find_by_id(run.id()).await.unwrap().unwrap();
        assert_eq!(found.task_description(), "Write docs");

        assert_eq!(repo.find_by_project(project_id).await.unwrap().len(), 1);
        assert!(repo.find_by_project(Uuid::new_v4()).await.unwrap().is_empty());

        repo.delete(run.id()).await.unwrap();
        assert!(repo.find_by_id(run.id()).await.unwrap().is_none());
        assert!(repo.delete(run.id()).await.is_err());
    }

    #[tokio::test]
    async fn activity_is_filtered_by_run() {
        let repo = InMemoryActivityRepository::new();
        let run_a = Uuid::new_v4();
        let run_b = Uuid::new_v4();

        repo.record(&ActivityEvent::new(run_a, ActivityKind::PhaseStart, "a1")).await.unwrap();
        repo.record(&ActivityEvent::new(run_b, ActivityKind::PhaseStart, "b1")).await.unwrap();
        repo.record(&ActivityEvent::new(run_a, ActivityKind::PhaseComplete, "a2")).await.unwrap();

        let events = repo.find_by_run(run_a).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "a1");
        assert_eq!(events[1].kind, ActivityKind::PhaseComplete);
    }

    #[tokio::test]
    async fn activity_drops_oldest_events_beyond_capacity() {
        let repo = InMemoryActivityRepository::with_capacity(2);
        let run_id = Uuid::new_v4();

        for message in ["first", "second", "third"] {
            repo.record(&ActivityEvent::new(run_id, ActivityKind::PhaseStart, message))
                .await
                .unwrap();
        }

        let messages: Vec<String> = repo
            .find_by_run(run_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, ["second", "third"]);
    }

    #[tokio::test]
    async fn pattern_save_replaces_the_same_key() {
        let repo = InMemoryPatternRepository::new();
        let mut pattern = LearnedPattern {
            error_type: "timeout".to_string(),
            role: AgentRole::Code,
            strategy: RecoveryStrategy::Retry,
            learned_at: chrono::Utc::now(),
        };
        repo.save(&pattern).await.unwrap();
        pattern.strategy = RecoveryStrategy::RestartWorker;
        repo.save(&pattern).await.unwrap();

        let stored = repo.find_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].strategy, RecoveryStrategy::RestartWorker);
    }
}
