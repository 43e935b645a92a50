use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use super::errors::{AgentError, AgentResult};
use super::oracle::{self, ReasoningOracle};
use super::prompts::library;
use super::types::{AgentRole, GoalAnalysis, Phase, PhaseResults, Plan, WorkerSpec, DEFAULT_PHASE_MINUTES};

/// Phase as the oracle describes it, before role normalization
#[derive(Debug, Deserialize)]
struct PhaseDraft {
    phase_name: String,
    #[serde(default)]
    description: String,
    required_role: String,
    #[serde(default)]
    estimated_duration: Option<f64>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    parallel_possible: bool,
    #[serde(default)]
    deliverables: Vec<String>,
}

impl PhaseDraft {
    fn into_phase(self) -> AgentResult<Phase> {
        let required_role = AgentRole::normalize(&self.required_role)?;
        let estimated_duration = self
            .estimated_duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| d.round() as u32)
            .unwrap_or(DEFAULT_PHASE_MINUTES);

        Ok(Phase {
            description: if self.description.is_empty() {
                self.phase_name.clone()
            } else {
                self.description
            },
            name: self.phase_name,
            required_role,
            estimated_duration,
            parallel_possible: self.parallel_possible,
            dependencies: self.dependencies,
            deliverables: self.deliverables,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Decomposition {
    Phases(Vec<PhaseDraft>),
    Wrapped { phases: Vec<PhaseDraft> },
}

/// Manager Agent responsible for goal analysis, task decomposition,
/// team formation and result synthesis
pub struct ManagerAgent {
    pub id: Uuid,
    oracle: Arc<dyn ReasoningOracle>,
}

impl ManagerAgent {
    pub fn new(oracle: Arc<dyn ReasoningOracle>) -> Self {
        Self {
            id: Uuid::new_v4(),
            oracle,
        }
    }

    /// Turn a task description into an executable plan
    pub async fn plan(&self, task_description: &str) -> AgentResult<Plan> {
        let analysis = self.analyze_goal(task_description).await?;
        let phases = self.decompose_goal(&analysis).await?;
        let workers = self.form_team(&phases);
        let plan = Plan::new(phases, workers)?;

        tracing::info!(
            manager_id = %self.id,
            phases = plan.phases().len(),
            workers = plan.workers().len(),
            estimated_minutes = plan.estimated_duration(),
            "Plan created"
        );
        Ok(plan)
    }

    /// Extract structured requirements from a task description
    pub async fn analyze_goal(&self, goal: &str) -> AgentResult<GoalAnalysis> {
        let prompt = library::goal_analysis().render_with(&[("goal", goal.to_string())]);
        oracle::ask_typed(self.oracle.as_ref(), "goal_analysis", &prompt, 1000).await
    }

    /// Break the analyzed goal into phases
    ///
    /// # Errors
    /// - `MalformedResponse` when the reply is not a phase list
    /// - `UnknownRole` when a phase names a role outside the closed set
    /// - `Planning` when the oracle returns no phases
    pub async fn decompose_goal(&self, analysis: &GoalAnalysis) -> AgentResult<Vec<Phase>> {
        let requirements = serde_json::to_string_pretty(analysis)?;
        let prompt = library::phase_decomposition().render_with(&[("requirements", requirements)]);

        let drafts = match oracle::ask_typed(self.oracle.as_ref(), "phase_decomposition", &prompt, 2000).await? {
            Decomposition::Phases(drafts) | Decomposition::Wrapped { phases: drafts } => drafts,
        };
        if drafts.is_empty() {
            return Err(AgentError::Planning(format!(
                "no phases produced for goal: {}",
                analysis.primary_goal
            )));
        }

        drafts.into_iter().map(PhaseDraft::into_phase).collect()
    }

    /// One worker spec per distinct role, in order of first use
    pub fn form_team(&self, phases: &[Phase]) -> Vec<WorkerSpec> {
        let mut team: Vec<WorkerSpec> = Vec::new();
        for phase in phases {
            if !team.iter().any(|spec| spec.role == phase.required_role) {
                team.push(WorkerSpec::for_role(phase.required_role));
            }
        }
        team
    }

    /// Summarize the results of a completed run
    pub async fn synthesize(&self, results: &PhaseResults) -> AgentResult<serde_json::Value> {
        let prompt = library::result_synthesis()
            .render_with(&[("results", serde_json::to_string_pretty(results)?)]);
        let reply = self.oracle.complete(&prompt, 2000).await?;
        oracle::extract_json("result_synthesis", &reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Replies to goal analysis and decomposition prompts
    struct PlannerOracle {
        decomposition: &'static str,
    }

    #[async_trait]
    impl ReasoningOracle for PlannerOracle {
        async fn complete(&self, prompt: &str, _max_output: u32) -> AgentResult<String> {
            if prompt.contains("executable phases") {
                Ok(self.decomposition.to_string())
            } else if prompt.contains("Synthesize") {
                Ok("{\"executive_summary\": \"all done\"}".to_string())
            } else {
                Ok("```json\n{\"primary_goal\": \"Ship a blog\", \"required_capabilities\": [\"writing\"]}\n```".to_string())
            }
        }
    }

    fn manager(decomposition: &'static str) -> ManagerAgent {
        ManagerAgent::new(Arc::new(PlannerOracle { decomposition }))
    }

    #[tokio::test]
    async fn plan_normalizes_roles_and_forms_team() {
        let manager = manager(
            r#"[
                {"phase_name": "research", "description": "Find topics", "required_role": "Researcher",
                 "estimated_duration": 20, "parallel_possible": true},
                {"phase_name": "write", "required_role": "writing", "dependencies": ["research"],
                 "estimated_duration": 40},
                {"phase_name": "edit", "required_role": "writer", "dependencies": ["write"]}
            ]"#,
        );

        let plan = manager.plan("Write a blog post").await.unwrap();

        assert_eq!(plan.phases().len(), 3);
        assert_eq!(plan.workers().len(), 2);
        assert_eq!(plan.phase("write").unwrap().required_role, AgentRole::Writer);
        assert_eq!(plan.phase("edit").unwrap().estimated_duration, DEFAULT_PHASE_MINUTES);
        assert_eq!(plan.phase("write").unwrap().description, "write");
        // (20 + 40 + 30) * 0.9
        assert_eq!(plan.estimated_duration(), 81);
    }

    #[tokio::test]
    async fn wrapped_decomposition_is_accepted() {
        let manager = manager(r#"{"phases": [{"phase_name": "a", "required_role": "qa"}]}"#);
        let plan = manager.plan("Test it").await.unwrap();
        assert_eq!(plan.phases()[0].required_role, AgentRole::Qa);
    }

    #[tokio::test]
    async fn unknown_role_is_rejected() {
        let manager = manager(r#"[{"phase_name": "a", "required_role": "astrologer"}]"#);
        let err = manager.plan("Read the stars").await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownRole(_)));
    }

    #[tokio::test]
    async fn empty_decomposition_is_planning_error() {
        let err = manager("[]").plan("Nothing").await.unwrap_err();
        assert!(matches!(err, AgentError::Planning(_)));
    }

    #[tokio::test]
    async fn prose_decomposition_is_malformed() {
        let err = manager("Phase one: think hard").plan("Think").await.unwrap_err();
        assert!(matches!(err, AgentError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn synthesize_returns_summary() {
        let mut results = PhaseResults::new();
        results.insert("a".to_string(), serde_json::json!({"ok": true}));

        let summary = manager("[]").synthesize(&results).await.unwrap();
        assert_eq!(summary["executive_summary"], "all done");
    }
}
