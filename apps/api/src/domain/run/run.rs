use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::events::RunEvent;
use super::value_objects::RunStatus;
use crate::agents::types::{PhaseResults, Plan};

/// Run aggregate root
///
/// A run is one attempt at carrying out a task description: the planner
/// decomposes it into a plan, the execution engine runs the plan, and the
/// run records the per-phase results and the synthesized summary.
///
/// # Invariants
/// - The task description is never empty
/// - Execution can only start once a plan is attached
/// - Results and summary are only set on completion
/// - Status transitions follow `RunStatus::can_transition_to`
#[derive(Debug, Clone)]
pub struct Run {
    id: Uuid,
    project_id: Uuid,
    task_description: String,
    status: RunStatus,
    plan: Option<Plan>,
    results: PhaseResults,
    summary: Option<Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Creates a new pending run
    ///
    /// # Example
    /// ```
    /// use crewline_api::domain::run::Run;
    /// use uuid::Uuid;
    ///
    /// let (run, events) = Run::new(Uuid::new_v4(), "Build a CLI todo app".to_string()).unwrap();
    /// assert_eq!(events.len(), 1);
    /// assert_eq!(run.task_description(), "Build a CLI todo app");
    /// ```
    pub fn new(project_id: Uuid, task_description: String) -> Result<(Self, Vec<RunEvent>), String> {
        let task_description = task_description.trim().to_string();
        if task_description.is_empty() {
            return Err("Task description cannot be empty".to_string());
        }

        let id = Uuid::new_v4();
        let run = Self {
            id,
            project_id,
            task_description: task_description.clone(),
            status: RunStatus::Pending,
            plan: None,
            results: PhaseResults::new(),
            summary: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        let event = RunEvent::Created {
            run_id: id,
            project_id,
            task_description,
        };

        Ok((run, vec![event]))
    }

    fn transition(&mut self, next: RunStatus, verb: &str) -> Result<(), String> {
        if !self.status.can_transition_to(next) {
            return Err(format!("Cannot {} run in {:?} status", verb, self.status));
        }
        self.status = next;
        Ok(())
    }

    pub fn start_planning(&mut self) -> Result<RunEvent, String> {
        self.transition(RunStatus::Planning, "plan")?;
        Ok(RunEvent::PlanningStarted { run_id: self.id })
    }

    /// Attaches the planner's output
    ///
    /// # Business Rules
    /// - Only allowed while planning
    /// - Replaces any previously attached plan
    pub fn attach_plan(&mut self, plan: Plan) -> Result<RunEvent, String> {
        if self.status != RunStatus::Planning {
            return Err(format!("Cannot attach plan to run in {:?} status", self.status));
        }

        let event = RunEvent::Planned {
            run_id: self.id,
            phases: plan.phases().len(),
            estimated_duration: plan.estimated_duration(),
        };
        self.plan = Some(plan);
        Ok(event)
    }

    pub fn start_execution(&mut self) -> Result<RunEvent, String> {
        if self.plan.is_none() {
            return Err("Cannot execute run without a plan".to_string());
        }
        self.transition(RunStatus::Executing, "execute")?;
        self.started_at = Some(Utc::now());
        Ok(RunEvent::Started { run_id: self.id })
    }

    pub fn complete(&mut self, results: PhaseResults, summary: Option<Value>) -> Result<RunEvent, String> {
        self.transition(RunStatus::Completed, "complete")?;
        let phases = results.len();
        self.results = results;
        self.summary = summary;
        self.completed_at = Some(Utc::now());
        Ok(RunEvent::Completed { run_id: self.id, phases })
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<RunEvent, String> {
        self.transition(RunStatus::Failed, "fail")?;
        let reason = reason.into();
        self.error = Some(reason.clone());
        self.completed_at = Some(Utc::now());
        Ok(RunEvent::Failed { run_id: self.id, reason })
    }

    pub fn archive(&mut self) -> Result<RunEvent, String> {
        self.transition(RunStatus::Archived, "archive")?;
        Ok(RunEvent::Archived { run_id: self.id })
    }

    // Getters
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    pub fn task_description(&self) -> &str {
        &self.task_description
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn results(&self) -> &PhaseResults {
        &self.results
    }

    pub fn summary(&self) -> Option<&Value> {
        self.summary.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Reconstruct a run from persistence (no events emitted)
    #[allow(clippy::too_many_arguments)]
    pub fn from_persistence(
        id: Uuid,
        project_id: Uuid,
        task_description: String,
        status: RunStatus,
        plan: Option<Plan>,
        results: PhaseResults,
        summary: Option<Value>,
        error: Option<String>,
        created_at: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            project_id,
            task_description,
            status,
            plan,
            results,
            summary,
            error,
            created_at,
            started_at,
            completed_at,
        }
    }
}
