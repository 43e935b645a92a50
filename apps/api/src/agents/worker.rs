use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::coordination::CoordinationManager;
use super::environment::ExecutionEnvironment;
use super::errors::{AgentError, AgentResult};
use super::oracle::{self, ReasoningOracle};
use super::prompts::library;
use super::types::{AgentRole, Phase, PhaseResults, WorkerSpec};

/// Failure reported by a worker for one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseFailure {
    pub error_type: String,
    pub message: String,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl PhaseFailure {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            context: serde_json::Map::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

impl From<AgentError> for PhaseFailure {
    fn from(err: AgentError) -> Self {
        PhaseFailure::new(err.kind(), err.to_string())
    }
}

/// Everything a worker sees while executing one phase
pub struct PhaseContext {
    pub run_id: Uuid,
    pub worker_id: Uuid,
    pub spec: WorkerSpec,
    pub environment: Arc<dyn ExecutionEnvironment>,
    pub coordination: CoordinationManager,
    /// Results of the phase's dependencies
    pub dependency_results: PhaseResults,
    /// Instructions from the recovery engine when re-running a failed phase
    pub guidance: Option<serde_json::Value>,
    /// 0 for the first dispatch, incremented on each recovery re-run
    pub attempt: u32,
    pub command_timeout: Duration,
}

/// Executes phases for one role
#[async_trait]
pub trait Worker: Send + Sync {
    async fn execute_phase(
        &self,
        phase: &Phase,
        ctx: &PhaseContext,
    ) -> Result<serde_json::Value, PhaseFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Working,
    Closed,
}

/// A worker bound to one run, owning its execution environment
pub struct WorkerInstance {
    id: Uuid,
    spec: WorkerSpec,
    task_id: Uuid,
    environment: Mutex<Arc<dyn ExecutionEnvironment>>,
    /// Replaced environments that running phases may still hold
    retired: Mutex<Vec<Arc<dyn ExecutionEnvironment>>>,
    progress: AtomicU8,
    completed_phases: AtomicUsize,
    active_phases: AtomicUsize,
    closed: AtomicBool,
}

impl WorkerInstance {
    pub fn new(
        id: Uuid,
        spec: WorkerSpec,
        task_id: Uuid,
        environment: Arc<dyn ExecutionEnvironment>,
    ) -> Self {
        Self {
            id,
            spec,
            task_id,
            environment: Mutex::new(environment),
            retired: Mutex::new(Vec::new()),
            progress: AtomicU8::new(0),
            completed_phases: AtomicUsize::new(0),
            active_phases: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> AgentRole {
        self.spec.role
    }

    pub fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    /// The run this worker serves
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn environment(&self) -> Arc<dyn ExecutionEnvironment> {
        self.environment
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Swap in a fresh environment
    ///
    /// The old environment is retired, not closed outright: a phase still
    /// running on it keeps working. Retired environments are closed once no
    /// phase holds them, and at the latest when the instance closes.
    pub async fn replace_environment(&self, environment: Arc<dyn ExecutionEnvironment>) -> AgentResult<()> {
        let old = {
            let mut current = self
                .environment
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *current, environment)
        };
        self.lock_retired().push(old);
        self.close_idle_retired().await
    }

    async fn close_idle_retired(&self) -> AgentResult<()> {
        let idle: Vec<Arc<dyn ExecutionEnvironment>> = {
            let mut retired = self.lock_retired();
            let (idle, busy): (Vec<_>, Vec<_>) = retired
                .drain(..)
                .partition(|env| Arc::strong_count(env) == 1);
            *retired = busy;
            idle
        };

        let mut outcome = Ok(());
        for env in idle {
            if let Err(e) = env.close().await {
                outcome = outcome.and(Err(e));
            }
        }
        outcome
    }

    fn lock_retired(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn ExecutionEnvironment>>> {
        self.retired.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::SeqCst)
    }

    pub fn set_progress(&self, progress: u8) {
        self.progress.store(progress.min(100), Ordering::SeqCst);
    }

    /// Count one finished phase out of `assigned` and return the new progress
    pub fn complete_phase(&self, assigned: usize) -> u8 {
        let done = self.completed_phases.fetch_add(1, Ordering::SeqCst) + 1;
        let progress = if assigned == 0 {
            100
        } else {
            (done.min(assigned) * 100 / assigned) as u8
        };
        self.set_progress(progress);
        progress
    }

    pub fn status(&self) -> WorkerStatus {
        if self.closed.load(Ordering::SeqCst) {
            WorkerStatus::Closed
        } else if self.active_phases.load(Ordering::SeqCst) > 0 {
            WorkerStatus::Working
        } else {
            WorkerStatus::Idle
        }
    }

    pub(crate) fn begin_phase(&self) {
        self.active_phases.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn end_phase(&self) {
        let _ = self
            .active_phases
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Close the current and every retired environment; later calls do nothing
    pub async fn close(&self) -> AgentResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let retired = std::mem::take(&mut *self.lock_retired());
        let mut outcome = self.environment().close().await;
        for env in retired {
            if let Err(e) = env.close().await {
                outcome = outcome.and(Err(e));
            }
        }
        outcome
    }
}

/// Default worker: asks the oracle to carry out the phase
///
/// If the reply lists `commands`, each one is run in the worker's
/// environment in order. A non-zero exit fails the phase; otherwise the
/// outputs are attached to the result under `command_outputs`.
pub struct OracleWorker {
    oracle: Arc<dyn ReasoningOracle>,
    max_output: u32,
}

impl OracleWorker {
    pub fn new(oracle: Arc<dyn ReasoningOracle>) -> Self {
        Self {
            oracle,
            max_output: 4000,
        }
    }

    fn render_guidance(ctx: &PhaseContext) -> String {
        let mut sections = Vec::new();
        if !ctx.dependency_results.is_empty() {
            let results = serde_json::to_string_pretty(&ctx.dependency_results).unwrap_or_default();
            sections.push(format!("Results from earlier phases:\n{results}"));
        }
        if let Some(guidance) = &ctx.guidance {
            sections.push(format!(
                "A previous attempt failed. Recovery guidance:\n{}",
                serde_json::to_string_pretty(guidance).unwrap_or_default()
            ));
        }
        sections.join("\n\n")
    }
}

#[async_trait]
impl Worker for OracleWorker {
    async fn execute_phase(
        &self,
        phase: &Phase,
        ctx: &PhaseContext,
    ) -> Result<serde_json::Value, PhaseFailure> {
        let prompt = library::phase_execution().render_with(&[
            ("system_prompt", ctx.spec.system_prompt.clone()),
            ("phase", phase.name.clone()),
            ("description", phase.description.clone()),
            ("deliverables", phase.deliverables.join(", ")),
            ("guidance", Self::render_guidance(ctx)),
        ]);

        let reply = self
            .oracle
            .complete(&prompt, self.max_output)
            .await
            .map_err(|e| PhaseFailure::from(e).with_context("phase", phase.name.clone().into()))?;
        let mut result = oracle::extract_json(&phase.name, &reply)
            .map_err(|e| PhaseFailure::from(e).with_context("phase", phase.name.clone().into()))?;

        let outputs = run_commands(&result, ctx).await?;
        if !outputs.is_empty() {
            if let Some(obj) = result.as_object_mut() {
                obj.insert("command_outputs".to_string(), serde_json::Value::Array(outputs));
            }
        }

        let artifact = phase.artifact_name();
        let body = serde_json::to_string_pretty(&result).unwrap_or_default();
        ctx.environment
            .write_file(&artifact, &body)
            .await
            .map_err(PhaseFailure::from)?;

        Ok(result)
    }
}

async fn run_commands(
    result: &serde_json::Value,
    ctx: &PhaseContext,
) -> Result<Vec<serde_json::Value>, PhaseFailure> {
    let commands = result
        .get("commands")
        .and_then(|c| c.as_array())
        .map(|c| c.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>())
        .unwrap_or_default();

    let mut outputs = Vec::with_capacity(commands.len());
    for command in commands {
        let output = ctx
            .environment
            .run(command, ctx.command_timeout)
            .await
            .map_err(|e| PhaseFailure::from(e).with_context("command", command.into()))?;

        if !output.success() {
            return Err(PhaseFailure::new("command_failed", output.stderr.trim().to_string())
                .with_context("command", command.into())
                .with_context("exit_code", output.exit_code.into()));
        }
        outputs.push(serde_json::json!({
            "command": command,
            "stdout": output.stdout,
        }));
    }
    Ok(outputs)
}

/// Maps roles to the worker implementation serving them
#[derive(Clone)]
pub struct WorkerRegistry {
    default: Arc<dyn Worker>,
    by_role: HashMap<AgentRole, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new(default: Arc<dyn Worker>) -> Self {
        Self {
            default,
            by_role: HashMap::new(),
        }
    }

    pub fn register(mut self, role: AgentRole, worker: Arc<dyn Worker>) -> Self {
        self.by_role.insert(role, worker);
        self
    }

    pub fn get(&self, role: AgentRole) -> Arc<dyn Worker> {
        self.by_role
            .get(&role)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::environment::{EnvironmentProvider, LocalEnvironmentProvider};
    use crate::agents::messages::{MessageBus, DEFAULT_MESSAGE_RETENTION};
    use crate::agents::state::{SharedStateStore, DEFAULT_STATE_TTL};
    use crate::agents::sync::SyncBarrier;

    struct FixedOracle(&'static str);

    #[async_trait]
    impl ReasoningOracle for FixedOracle {
        async fn complete(&self, _prompt: &str, _max_output: u32) -> AgentResult<String> {
            Ok(self.0.to_string())
        }
    }

    struct Named(&'static str);

    #[async_trait]
    impl Worker for Named {
        async fn execute_phase(
            &self,
            _phase: &Phase,
            _ctx: &PhaseContext,
        ) -> Result<serde_json::Value, PhaseFailure> {
            Ok(serde_json::json!(self.0))
        }
    }

    async fn context(role: AgentRole) -> PhaseContext {
        let run_id = Uuid::new_v4();
        let worker_id = Uuid::new_v4();
        let root = std::env::temp_dir().join(format!("crewline-worker-{}", Uuid::new_v4()));
        let environment = LocalEnvironmentProvider::new(root)
            .provision(worker_id, role)
            .await
            .unwrap();

        PhaseContext {
            run_id,
            worker_id,
            spec: WorkerSpec::for_role(role),
            environment,
            coordination: CoordinationManager::new(
                Arc::new(MessageBus::new(run_id, DEFAULT_MESSAGE_RETENTION)),
                Arc::new(SharedStateStore::new(run_id, DEFAULT_STATE_TTL)),
                Arc::new(SyncBarrier::new()),
            ),
            dependency_results: PhaseResults::new(),
            guidance: None,
            attempt: 0,
            command_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn oracle_worker_returns_json_and_writes_artifact() {
        let worker = OracleWorker::new(Arc::new(FixedOracle("```json\n{\"summary\": \"done\"}\n```")));
        let ctx = context(AgentRole::Writer).await;
        let phase = Phase::new("Draft Outline", AgentRole::Writer);

        let result = worker.execute_phase(&phase, &ctx).await.unwrap();
        assert_eq!(result["summary"], "done");

        let artifact = ctx.environment.read_file("draft_outline.json").await.unwrap();
        assert!(artifact.contains("done"));
        ctx.environment.close().await.unwrap();
    }

    #[tokio::test]
    async fn oracle_worker_reports_malformed_reply_as_failure() {
        let worker = OracleWorker::new(Arc::new(FixedOracle("I could not do it")));
        let ctx = context(AgentRole::Code).await;
        let phase = Phase::new("build", AgentRole::Code);

        let failure = worker.execute_phase(&phase, &ctx).await.unwrap_err();
        assert_eq!(failure.error_type, "malformed_response");
        assert_eq!(failure.context["phase"], "build");
        ctx.environment.close().await.unwrap();
    }

    #[tokio::test]
    async fn oracle_worker_runs_listed_commands() {
        let worker = OracleWorker::new(Arc::new(FixedOracle(
            r#"{"summary": "built", "commands": ["echo hello"]}"#,
        )));
        let ctx = context(AgentRole::Code).await;
        let phase = Phase::new("build", AgentRole::Code);

        let result = worker.execute_phase(&phase, &ctx).await.unwrap();
        assert_eq!(result["command_outputs"][0]["command"], "echo hello");
        assert_eq!(result["command_outputs"][0]["stdout"], "hello\n");
        ctx.environment.close().await.unwrap();
    }

    #[tokio::test]
    async fn failing_command_fails_the_phase() {
        let worker = OracleWorker::new(Arc::new(FixedOracle(
            r#"{"commands": ["echo broken >&2; exit 3"]}"#,
        )));
        let ctx = context(AgentRole::Code).await;
        let phase = Phase::new("build", AgentRole::Code);

        let failure = worker.execute_phase(&phase, &ctx).await.unwrap_err();
        assert_eq!(failure.error_type, "command_failed");
        assert_eq!(failure.message, "broken");
        assert_eq!(failure.context["exit_code"], 3);
        ctx.environment.close().await.unwrap();
    }

    #[tokio::test]
    async fn registry_falls_back_to_default_worker() {
        let registry = WorkerRegistry::new(Arc::new(Named("default")))
            .register(AgentRole::Qa, Arc::new(Named("qa")));
        let ctx = context(AgentRole::Qa).await;
        let phase = Phase::new("check", AgentRole::Qa);

        let qa = registry.get(AgentRole::Qa).execute_phase(&phase, &ctx).await.unwrap();
        let code = registry.get(AgentRole::Code).execute_phase(&phase, &ctx).await.unwrap();
        assert_eq!(qa, "qa");
        assert_eq!(code, "default");
        ctx.environment.close().await.unwrap();
    }

    #[tokio::test]
    async fn instance_tracks_progress_status_and_close() {
        let ctx = context(AgentRole::Code).await;
        let instance = WorkerInstance::new(
            ctx.worker_id,
            WorkerSpec::for_role(AgentRole::Code),
            ctx.run_id,
            ctx.environment.clone(),
        );

        assert_eq!(instance.status(), WorkerStatus::Idle);
        instance.begin_phase();
        assert_eq!(instance.status(), WorkerStatus::Working);
        instance.end_phase();
        instance.end_phase();
        assert_eq!(instance.status(), WorkerStatus::Idle);

        assert_eq!(instance.complete_phase(3), 33);
        assert_eq!(instance.progress(), 33);
        instance.set_progress(250);
        assert_eq!(instance.progress(), 100);

        instance.close().await.unwrap();
        instance.close().await.unwrap();
        assert_eq!(instance.status(), WorkerStatus::Closed);
    }

    #[tokio::test]
    async fn replaced_environment_stays_open_while_a_phase_holds_it() {
        let root = std::env::temp_dir().join(format!("crewline-worker-{}", Uuid::new_v4()));
        let provider = LocalEnvironmentProvider::new(root);
        let worker_id = Uuid::new_v4();
        let instance = WorkerInstance::new(
            worker_id,
            WorkerSpec::for_role(AgentRole::Code),
            Uuid::new_v4(),
            provider.provision(worker_id, AgentRole::Code).await.unwrap(),
        );

        let held = instance.environment();
        let fresh = provider.provision(worker_id, AgentRole::Code).await.unwrap();
        instance.replace_environment(fresh).await.unwrap();

        let output = held.run("echo still here", Duration::from_secs(5)).await.unwrap();
        assert_eq!(output.stdout.trim(), "still here");
        let output = instance
            .environment()
            .run("echo fresh", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "fresh");

        instance.close().await.unwrap();
        let err = held.read_file("anything").await.unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[test]
    fn agent_error_becomes_failure_with_kind() {
        let failure = PhaseFailure::from(AgentError::Environment("disk full".to_string()));
        assert_eq!(failure.error_type, "environment");
        assert!(failure.message.contains("disk full"));
    }
}
