use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::errors::{AgentError, AgentResult};

/// Default phase duration in minutes when the planner omits one
pub const DEFAULT_PHASE_MINUTES: u32 = 30;

/// Smallest total estimate a plan reports, in minutes
pub const MIN_PLAN_MINUTES: u32 = 5;

/// Results of a run keyed by phase name
pub type PhaseResults = BTreeMap<String, serde_json::Value>;

/// Analysis of a user's goal produced by the planner
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoalAnalysis {
    pub primary_goal: String,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub complexity_level: Option<String>,
    #[serde(default)]
    pub estimated_scope: Option<String>,
    #[serde(default)]
    pub key_deliverables: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// Worker roles known to the system
///
/// Roles are a closed set: planner output naming anything else is rejected
/// during normalization instead of falling back to a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Orchestrator,
    Research,
    Code,
    Writer,
    Designer,
    Analyst,
    Qa,
    ToolBuilder,
}

impl AgentRole {
    pub const ALL: [AgentRole; 8] = [
        AgentRole::Orchestrator,
        AgentRole::Research,
        AgentRole::Code,
        AgentRole::Writer,
        AgentRole::Designer,
        AgentRole::Analyst,
        AgentRole::Qa,
        AgentRole::ToolBuilder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Orchestrator => "orchestrator",
            AgentRole::Research => "research",
            AgentRole::Code => "code",
            AgentRole::Writer => "writer",
            AgentRole::Designer => "designer",
            AgentRole::Analyst => "analyst",
            AgentRole::Qa => "qa",
            AgentRole::ToolBuilder => "tool_builder",
        }
    }

    /// Map the many spellings a planner uses for a role onto the closed set
    ///
    /// # Example
    /// ```
    /// use crewline_api::agents::types::AgentRole;
    ///
    /// assert_eq!(AgentRole::normalize("Coding").unwrap(), AgentRole::Code);
    /// assert_eq!(AgentRole::normalize("tool-builder").unwrap(), AgentRole::ToolBuilder);
    /// assert!(AgentRole::normalize("astronaut").is_err());
    /// ```
    pub fn normalize(raw: &str) -> AgentResult<AgentRole> {
        let normalized = raw.trim().to_lowercase().replace(['-', ' '], "_");

        let role = match normalized.as_str() {
            "coding" | "code" | "coder" | "developer" | "programming" => AgentRole::Code,
            "research" | "researcher" | "researching" => AgentRole::Research,
            "writing" | "writer" | "content" => AgentRole::Writer,
            "design" | "designer" | "designing" => AgentRole::Designer,
            "analysis" | "analyst" | "analyzing" => AgentRole::Analyst,
            "qa" | "testing" | "tester" | "quality" => AgentRole::Qa,
            "tool_builder" | "toolbuilder" | "tools" => AgentRole::ToolBuilder,
            "orchestrator" | "orchestration" => AgentRole::Orchestrator,
            _ => return Err(AgentError::UnknownRole(raw.to_string())),
        };

        Ok(role)
    }

    /// Capabilities a worker of this role is expected to bring
    pub fn capabilities(&self) -> Vec<String> {
        let caps: &[&str] = match self {
            AgentRole::Research => &["web_search", "data_extraction", "fact_checking", "source_evaluation"],
            AgentRole::Code => &["programming", "debugging", "code_review", "testing", "documentation"],
            AgentRole::Writer => &["content_creation", "editing", "formatting", "storytelling", "technical_writing"],
            AgentRole::Designer => &["ui_design", "visual_composition", "branding", "user_experience"],
            AgentRole::Analyst => &["data_analysis", "statistical_modeling", "insight_generation", "reporting"],
            AgentRole::Qa => &["testing", "quality_assurance", "bug_detection", "validation"],
            AgentRole::ToolBuilder => &["tool_development", "api_integration", "automation", "scripting"],
            AgentRole::Orchestrator => &["general_problem_solving"],
        };
        caps.iter().map(|c| c.to_string()).collect()
    }

    /// Tools a worker of this role gets inside its execution environment
    pub fn tools(&self) -> Vec<String> {
        let tools: &[&str] = match self {
            AgentRole::Research => &["web_search", "http_request", "file_reader"],
            AgentRole::Code => &["python_repl", "file_editor", "shell", "git"],
            AgentRole::Writer => &["file_editor", "text_processor", "formatter"],
            AgentRole::Designer => &["image_processor", "ui_generator", "prototype_builder"],
            AgentRole::Analyst => &["python_repl", "data_processor", "chart_generator"],
            AgentRole::Qa => &["testing_framework", "validator", "bug_detector"],
            AgentRole::ToolBuilder => &["python_repl", "file_editor", "package_manager", "testing_framework"],
            AgentRole::Orchestrator => &["file_reader", "file_writer"],
        };
        tools.iter().map(|t| t.to_string()).collect()
    }

    pub fn title(&self) -> &'static str {
        match self {
            AgentRole::Orchestrator => "Orchestrator",
            AgentRole::Research => "Research",
            AgentRole::Code => "Code",
            AgentRole::Writer => "Writer",
            AgentRole::Designer => "Designer",
            AgentRole::Analyst => "Analyst",
            AgentRole::Qa => "QA",
            AgentRole::ToolBuilder => "Tool Builder",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Description of the worker that serves one role in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub role: AgentRole,
    pub name: String,
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl WorkerSpec {
    /// Spec with the role's stock capabilities, tools and system prompt
    pub fn for_role(role: AgentRole) -> Self {
        let capabilities = role.capabilities();
        Self {
            role,
            name: format!("{} Agent", role.title()),
            system_prompt: super::prompts::worker_system_prompt(role, &capabilities),
            tools: role.tools(),
            capabilities,
        }
    }
}

/// One unit of work in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub description: String,
    pub required_role: AgentRole,
    #[serde(default = "default_phase_minutes")]
    pub estimated_duration: u32,
    #[serde(default)]
    pub parallel_possible: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub deliverables: Vec<String>,
}

fn default_phase_minutes() -> u32 {
    DEFAULT_PHASE_MINUTES
}

impl Phase {
    pub fn new(name: impl Into<String>, required_role: AgentRole) -> Self {
        let name = name.into();
        Self {
            description: name.clone(),
            name,
            required_role,
            estimated_duration: DEFAULT_PHASE_MINUTES,
            parallel_possible: false,
            dependencies: Vec::new(),
            deliverables: Vec::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.estimated_duration = minutes;
        self
    }

    pub fn parallel(mut self, parallel_possible: bool) -> Self {
        self.parallel_possible = parallel_possible;
        self
    }

    /// File a worker writes this phase's result to
    pub fn artifact_name(&self) -> String {
        let slug: String = self
            .name
            .chars()
            .flat_map(|c| {
                let c = if c.is_alphanumeric() { c } else { '_' };
                c.to_lowercase()
            })
            .collect();
        format!("{slug}.json")
    }
}

/// Runtime lifecycle of a phase inside one run
///
/// # Status Transitions
/// ```text
/// NotStarted -> Ready -> Running -> Completed
///                           └-----> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    NotStarted,
    Ready,
    Running,
    Completed,
    Failed,
}

impl PhaseStatus {
    pub fn can_transition_to(&self, next: PhaseStatus) -> bool {
        use PhaseStatus::*;
        matches!(
            (self, next),
            (NotStarted, Ready) | (Ready, Running) | (Running, Completed) | (Running, Failed)
        )
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseStatus::NotStarted => write!(f, "not_started"),
            PhaseStatus::Ready => write!(f, "ready"),
            PhaseStatus::Running => write!(f, "running"),
            PhaseStatus::Completed => write!(f, "completed"),
            PhaseStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Completion edge: `to` may start only after `from` completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Immutable execution plan for one run
///
/// # Invariants
/// - Phase names are unique
/// - Every dependency names a phase of the same plan
/// - Every phase role has exactly one worker spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    phases: Vec<Phase>,
    workers: Vec<WorkerSpec>,
    dependencies: Vec<DependencyEdge>,
    estimated_duration: u32,
}

impl Plan {
    /// Builds and validates a plan
    ///
    /// Dependency cycles are not rejected here; the execution engine
    /// reports them as a deadlock.
    pub fn new(phases: Vec<Phase>, workers: Vec<WorkerSpec>) -> AgentResult<Self> {
        if phases.is_empty() {
            return Err(AgentError::Planning("plan has no phases".to_string()));
        }

        let mut names = HashSet::new();
        let mut artifacts = HashMap::new();
        for phase in &phases {
            if phase.name.trim().is_empty() {
                return Err(AgentError::Planning("phase name cannot be empty".to_string()));
            }
            if !names.insert(phase.name.as_str()) {
                return Err(AgentError::Planning(format!(
                    "duplicate phase name: {}",
                    phase.name
                )));
            }
            if let Some(other) = artifacts.insert(phase.artifact_name(), phase.name.as_str()) {
                return Err(AgentError::Planning(format!(
                    "phases '{}' and '{}' would write the same artifact",
                    other, phase.name
                )));
            }
        }

        for phase in &phases {
            if let Some(missing) = phase.dependencies.iter().find(|d| !names.contains(d.as_str())) {
                return Err(AgentError::Planning(format!(
                    "phase '{}' depends on unknown phase '{}'",
                    phase.name, missing
                )));
            }
        }

        let mut roles = HashSet::new();
        for spec in &workers {
            if !roles.insert(spec.role) {
                return Err(AgentError::Planning(format!(
                    "more than one worker spec for role {}",
                    spec.role
                )));
            }
        }
        if let Some(phase) = phases.iter().find(|p| !roles.contains(&p.required_role)) {
            return Err(AgentError::Planning(format!(
                "no worker spec for role {} required by phase '{}'",
                phase.required_role, phase.name
            )));
        }

        let dependencies = dependency_edges(&phases);
        let estimated_duration = estimate_duration(&phases);

        Ok(Self {
            phases,
            workers,
            dependencies,
            estimated_duration,
        })
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn workers(&self) -> &[WorkerSpec] {
        &self.workers
    }

    pub fn dependencies(&self) -> &[DependencyEdge] {
        &self.dependencies
    }

    /// Estimated total duration in minutes
    pub fn estimated_duration(&self) -> u32 {
        self.estimated_duration
    }

    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn worker_for(&self, role: AgentRole) -> Option<&WorkerSpec> {
        self.workers.iter().find(|w| w.role == role)
    }
}

/// One completion edge per declared dependency
pub fn dependency_edges(phases: &[Phase]) -> Vec<DependencyEdge> {
    phases
        .iter()
        .flat_map(|phase| {
            phase.dependencies.iter().map(move |dep| DependencyEdge {
                from: dep.clone(),
                to: phase.name.clone(),
                kind: "completion".to_string(),
            })
        })
        .collect()
}

/// Coarse duration heuristic in minutes
///
/// Sums every phase, takes `min(0.3, 0.1 * parallelizable)` off the total
/// (truncating), and never reports less than [`MIN_PLAN_MINUTES`]. This is
/// not a critical-path computation.
pub fn estimate_duration(phases: &[Phase]) -> u32 {
    let mut total: u32 = phases.iter().map(|p| p.estimated_duration).sum();

    let parallelizable = phases.iter().filter(|p| p.parallel_possible).count();
    if parallelizable > 0 {
        let discount = f64::min(0.3, parallelizable as f64 * 0.1);
        total = (total as f64 * (1.0 - discount)) as u32;
    }

    total.max(MIN_PLAN_MINUTES)
}
