// Dependency-driven phase execution
//
// The engine owns the worker instances of one run. It repeatedly
// dispatches every ready phase (pending, not running, all dependencies
// completed) onto a `JoinSet` and reacts to outcomes as they arrive.
// Recovery happens inside each phase task, so a phase only reports back
// once it succeeded or recovery gave up. After the first unrecovered
// failure nothing new is dispatched; running siblings drain first.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::{JoinError, JoinSet};
use uuid::Uuid;

use super::environment::EnvironmentProvider;
use super::errors::{AgentError, AgentResult};
use super::events::{ActivityEvent, ActivityKind};
use super::orchestrator::RunContext;
use super::recovery::{RecoveryProbe, RecoveryStrategy};
use super::types::{AgentRole, Phase, PhaseResults, Plan};
use super::worker::{PhaseContext, PhaseFailure, Worker, WorkerInstance, WorkerRegistry};

pub struct ExecutionEngine {
    context: RunContext,
    registry: WorkerRegistry,
    provider: Arc<dyn EnvironmentProvider>,
}

impl ExecutionEngine {
    pub fn new(
        context: RunContext,
        registry: WorkerRegistry,
        provider: Arc<dyn EnvironmentProvider>,
    ) -> Self {
        Self {
            context,
            registry,
            provider,
        }
    }

    /// Execute every phase of the plan, honoring dependencies
    ///
    /// # Errors
    /// - `DependencyDeadlock` when pending phases can never become ready
    /// - `RecoveryExhausted` for the first phase whose recovery gave up
    pub async fn execute(&self, plan: &Plan) -> AgentResult<PhaseResults> {
        let instances = self.spawn_workers(plan).await?;
        let outcome = self.run_phases(plan, &instances).await;

        for instance in instances.values() {
            if let Err(e) = instance.close().await {
                tracing::warn!(
                    run_id = %self.context.run_id,
                    worker_id = %instance.id(),
                    error = %e,
                    "Failed to close worker environment"
                );
            }
            self.context.coordination.bus().unregister_worker(instance.id());
        }

        outcome
    }

    async fn spawn_workers(&self, plan: &Plan) -> AgentResult<HashMap<AgentRole, Arc<WorkerInstance>>> {
        let mut instances: HashMap<AgentRole, Arc<WorkerInstance>> = HashMap::new();

        for spec in plan.workers() {
            let worker_id = Uuid::new_v4();
            let environment = match self.provider.provision(worker_id, spec.role).await {
                Ok(environment) => environment,
                Err(e) => {
                    for instance in instances.values() {
                        let _ = instance.close().await;
                    }
                    return Err(e);
                }
            };

            self.context
                .coordination
                .bus()
                .register_worker(worker_id, spec.role);
            instances.insert(
                spec.role,
                Arc::new(WorkerInstance::new(
                    worker_id,
                    spec.clone(),
                    self.context.run_id,
                    environment,
                )),
            );
        }

        tracing::info!(
            run_id = %self.context.run_id,
            workers = instances.len(),
            "Worker instances spawned"
        );
        Ok(instances)
    }

    async fn run_phases(
        &self,
        plan: &Plan,
        instances: &HashMap<AgentRole, Arc<WorkerInstance>>,
    ) -> AgentResult<PhaseResults> {
        let mut pending: HashSet<String> = plan.phases().iter().map(|p| p.name.clone()).collect();
        let mut running: HashSet<String> = HashSet::new();
        let mut completed: HashSet<String> = HashSet::new();
        let mut results = PhaseResults::new();
        let mut tasks: JoinSet<(String, AgentResult<serde_json::Value>)> = JoinSet::new();
        let mut dispatched: HashMap<tokio::task::Id, (String, Arc<WorkerInstance>)> = HashMap::new();
        let mut failure: Option<AgentError> = None;

        loop {
            if failure.is_none() {
                let ready: Vec<&Phase> = plan
                    .phases()
                    .iter()
                    .filter(|p| {
                        pending.contains(&p.name)
                            && !running.contains(&p.name)
                            && p.dependencies.iter().all(|d| completed.contains(d))
                    })
                    .collect();

                for phase in ready {
                    let instance = instances
                        .get(&phase.required_role)
                        .cloned()
                        .ok_or_else(|| AgentError::AgentNotFound(phase.required_role.to_string()))?;

                    let run = PhaseRun {
                        context: self.context.clone(),
                        phase: phase.clone(),
                        worker: self.registry.get(phase.required_role),
                        instance: instance.clone(),
                        provider: self.provider.clone(),
                        dependency_results: phase
                            .dependencies
                            .iter()
                            .filter_map(|d| results.get(d).map(|r| (d.clone(), r.clone())))
                            .collect(),
                        attempts: AtomicU32::new(0),
                        assigned: plan
                            .phases()
                            .iter()
                            .filter(|p| p.required_role == phase.required_role)
                            .count(),
                    };

                    running.insert(phase.name.clone());
                    let name = phase.name.clone();
                    let handle = tasks.spawn(async move {
                        let outcome = run.run().await;
                        (name, outcome)
                    });
                    dispatched.insert(handle.id(), (phase.name.clone(), instance));
                }
            }

            if running.is_empty() {
                if let Some(err) = failure {
                    return Err(err);
                }
                if pending.is_empty() {
                    break;
                }

                let stuck: Vec<String> = plan
                    .phases()
                    .iter()
                    .filter(|p| pending.contains(&p.name))
                    .map(|p| p.name.clone())
                    .collect();
                tracing::error!(
                    run_id = %self.context.run_id,
                    pending = ?stuck,
                    "Execution deadlock: no phases ready to execute"
                );
                return Err(AgentError::DependencyDeadlock { pending: stuck });
            }

            match tasks.join_next_with_id().await {
                Some(Ok((id, (name, Ok(value))))) => {
                    dispatched.remove(&id);
                    running.remove(&name);
                    pending.remove(&name);
                    completed.insert(name.clone());
                    results.insert(name, value);
                }
                Some(Ok((id, (name, Err(err))))) => {
                    dispatched.remove(&id);
                    running.remove(&name);
                    tracing::error!(
                        run_id = %self.context.run_id,
                        phase = %name,
                        error = %err,
                        "Phase failed without recovery; draining running phases"
                    );
                    if failure.is_none() {
                        failure = Some(err);
                    }
                }
                Some(Err(join_err)) => {
                    let Some((name, instance)) = dispatched.remove(&join_err.id()) else {
                        tracing::error!(run_id = %self.context.run_id, error = %join_err, "Untracked phase task failed");
                        continue;
                    };
                    running.remove(&name);
                    let err = self.abandon_phase(&name, &instance, join_err).await;
                    if failure.is_none() {
                        failure = Some(err);
                    }
                }
                None => {
                    // Every task is gone; names still marked running belonged to aborted tasks.
                    running.clear();
                }
            }
        }

        tracing::info!(
            run_id = %self.context.run_id,
            phases = results.len(),
            "All phases completed"
        );
        Ok(results)
    }
}

impl ExecutionEngine {
    /// Turn a phase task that died outside the worker call into an escalated failure
    async fn abandon_phase(&self, name: &str, instance: &WorkerInstance, join_err: JoinError) -> AgentError {
        let message = panic_message(join_err);
        tracing::error!(run_id = %self.context.run_id, phase = name, error = %message, "Phase task aborted");
        self.context
            .activity
            .emit(
                ActivityEvent::new(
                    self.context.run_id,
                    ActivityKind::PhaseError,
                    format!("Error in phase {name}: {message}"),
                )
                .worker(instance.id())
                .metadata(serde_json::json!({ "phase": name, "error_type": PANIC_ERROR_TYPE, "exhausted": true })),
            )
            .await;

        let recovery = &self.context.recovery;
        let report = recovery
            .report_error(instance.id(), instance.role(), name, PhaseFailure::new(PANIC_ERROR_TYPE, message))
            .await;
        recovery.give_up(report.id()).await
    }
}

/// Error type reported for a phase whose task panicked
pub const PANIC_ERROR_TYPE: &str = "worker_panic";

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "task panicked".to_string())
}

/// One phase dispatched onto one worker instance
struct PhaseRun {
    context: RunContext,
    phase: Phase,
    worker: Arc<dyn Worker>,
    instance: Arc<WorkerInstance>,
    provider: Arc<dyn EnvironmentProvider>,
    dependency_results: PhaseResults,
    attempts: AtomicU32,
    /// Phases of the plan assigned to this worker
    assigned: usize,
}

impl PhaseRun {
    async fn run(&self) -> AgentResult<serde_json::Value> {
        self.instance.begin_phase();
        let outcome = self.run_with_recovery().await;
        self.instance.end_phase();
        outcome
    }

    async fn run_with_recovery(&self) -> AgentResult<serde_json::Value> {
        self.emit(
            ActivityKind::PhaseStart,
            format!("Starting phase: {}", self.phase.name),
            serde_json::json!({ "role": self.phase.required_role }),
        )
        .await;

        let failure = match self.execute_once(None).await {
            Ok(value) => {
                self.complete(&value, false).await;
                return Ok(value);
            }
            Err(failure) => failure,
        };

        self.emit(
            ActivityKind::PhaseError,
            format!("Error in phase {}: {}", self.phase.name, failure.message),
            serde_json::json!({ "error_type": failure.error_type }),
        )
        .await;

        let recovery = self.context.recovery.clone();
        let report = recovery
            .report_error(self.instance.id(), self.instance.role(), &self.phase.name, failure)
            .await;

        match recovery.recover(report.id(), self).await {
            Ok(value) => {
                self.complete(&value, true).await;
                Ok(value)
            }
            Err(err) => {
                self.emit(
                    ActivityKind::PhaseError,
                    format!("Phase {} could not be recovered", self.phase.name),
                    serde_json::json!({ "error_id": report.id(), "exhausted": true }),
                )
                .await;
                Err(err)
            }
        }
    }

    async fn execute_once(
        &self,
        guidance: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, PhaseFailure> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let ctx = PhaseContext {
            run_id: self.context.run_id,
            worker_id: self.instance.id(),
            spec: self.instance.spec().clone(),
            environment: self.instance.environment(),
            coordination: self.context.coordination.clone(),
            dependency_results: self.dependency_results.clone(),
            guidance,
            attempt,
            command_timeout: self.context.command_timeout,
        };

        tracing::debug!(
            run_id = %self.context.run_id,
            phase = %self.phase.name,
            worker_id = %self.instance.id(),
            attempt,
            "Dispatching phase"
        );

        // The worker runs in its own task so a panic fails this attempt instead of the run.
        let worker = self.worker.clone();
        let phase = self.phase.clone();
        let mut attempt_task = JoinSet::new();
        attempt_task.spawn(async move { worker.execute_phase(&phase, &ctx).await });

        match attempt_task.join_next().await {
            Some(Ok(outcome)) => outcome,
            Some(Err(join_err)) => {
                let message = panic_message(join_err);
                tracing::error!(
                    run_id = %self.context.run_id,
                    phase = %self.phase.name,
                    error = %message,
                    "Worker panicked while executing phase"
                );
                Err(PhaseFailure::new(PANIC_ERROR_TYPE, message)
                    .with_context("phase", self.phase.name.clone().into()))
            }
            None => Err(PhaseFailure::new(PANIC_ERROR_TYPE, "worker task vanished")),
        }
    }

    async fn complete(&self, value: &serde_json::Value, recovered: bool) {
        self.context.coordination.state().set(
            format!("phase:{}:result", self.phase.name),
            value.clone(),
            self.instance.id().to_string(),
        );
        let progress = self.instance.complete_phase(self.assigned);
        self.emit(
            ActivityKind::PhaseComplete,
            format!("Completed phase: {}", self.phase.name),
            serde_json::json!({ "recovered": recovered, "worker_progress": progress }),
        )
        .await;
    }

    async fn emit(&self, kind: ActivityKind, message: String, mut metadata: serde_json::Value) {
        if let Some(map) = metadata.as_object_mut() {
            map.insert("phase".to_string(), self.phase.name.clone().into());
        }
        self.context
            .activity
            .emit(
                ActivityEvent::new(self.context.run_id, kind, message)
                    .worker(self.instance.id())
                    .metadata(metadata),
            )
            .await;
    }
}

#[async_trait]
impl RecoveryProbe for PhaseRun {
    async fn attempt(
        &self,
        strategy: RecoveryStrategy,
        guidance: Option<serde_json::Value>,
    ) -> AgentResult<serde_json::Value> {
        let guidance = serde_json::json!({
            "strategy": strategy,
            "details": guidance,
        });

        self.execute_once(Some(guidance))
            .await
            .map_err(|failure| AgentError::PhaseExecution {
                phase: self.phase.name.clone(),
                message: failure.message,
            })
    }

    async fn restart(&self) -> AgentResult<()> {
        let fresh = self
            .provider
            .provision(self.instance.id(), self.instance.role())
            .await?;
        if let Err(e) = self.instance.replace_environment(fresh).await {
            tracing::warn!(
                worker_id = %self.instance.id(),
                error = %e,
                "Failed to close replaced environment"
            );
        }

        tracing::info!(
            run_id = %self.context.run_id,
            worker_id = %self.instance.id(),
            phase = %self.phase.name,
            "Worker environment restarted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::environment::{CommandOutput, ExecutionEnvironment};
    use crate::agents::events::ActivitySink;
    use crate::agents::oracle::ReasoningOracle;
    use crate::agents::recovery::{PatternCache, RecoveryConfig};
    use crate::agents::types::WorkerSpec;
    use std::sync::Mutex;
    use std::time::Duration;

    struct NullEnvironment;

    #[async_trait]
    impl ExecutionEnvironment for NullEnvironment {
        fn id(&self) -> &str {
            "null"
        }

        async fn run(&self, _command: &str, _timeout: Duration) -> AgentResult<CommandOutput> {
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            })
        }

        async fn read_file(&self, _path: &str) -> AgentResult<String> {
            Ok(String::new())
        }

        async fn write_file(&self, _path: &str, _content: &str) -> AgentResult<()> {
            Ok(())
        }

        async fn close(&self) -> AgentResult<()> {
            Ok(())
        }
    }

    struct NullProvider;

    #[async_trait]
    impl EnvironmentProvider for NullProvider {
        async fn provision(
            &self,
            _worker_id: Uuid,
            _role: AgentRole,
        ) -> AgentResult<Arc<dyn ExecutionEnvironment>> {
            Ok(Arc::new(NullEnvironment))
        }
    }

    struct SilentOracle;

    #[async_trait]
    impl ReasoningOracle for SilentOracle {
        async fn complete(&self, _prompt: &str, _max_output: u32) -> AgentResult<String> {
            Err(AgentError::Oracle("offline".to_string()))
        }
    }

    /// Records the order phases finish in and fails named phases forever
    #[derive(Default)]
    struct RecordingWorker {
        finished: Mutex<Vec<String>>,
        always_fail: Vec<String>,
        /// Phases that panic on their first `n` calls
        panics: Mutex<HashMap<String, usize>>,
    }

    #[async_trait]
    impl Worker for RecordingWorker {
        async fn execute_phase(
            &self,
            phase: &Phase,
            ctx: &PhaseContext,
        ) -> Result<serde_json::Value, PhaseFailure> {
            tokio::task::yield_now().await;
            let panic_now = {
                let mut panics = self.panics.lock().unwrap();
                match panics.get_mut(&phase.name) {
                    Some(left) if *left > 0 => {
                        *left -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if panic_now {
                panic!("worker bug in {}", phase.name);
            }
            if self.always_fail.contains(&phase.name) {
                return Err(PhaseFailure::new("crash", "worker crashed"));
            }
            for dep in &phase.dependencies {
                assert!(ctx.dependency_results.contains_key(dep), "{dep} result missing");
            }
            self.finished.lock().unwrap().push(phase.name.clone());
            Ok(serde_json::json!({ "phase": phase.name }))
        }
    }

    fn engine(worker: Arc<RecordingWorker>) -> (ExecutionEngine, ActivitySink) {
        let activity = ActivitySink::default();
        let context = RunContext::new(
            Uuid::new_v4(),
            Arc::new(SilentOracle),
            activity.clone(),
            PatternCache::new(),
            &crate::config::RuntimeConfig {
                recovery: RecoveryConfig {
                    max_attempts: 3,
                    backoff_unit: Duration::from_millis(1),
                },
                ..Default::default()
            },
        );
        let engine = ExecutionEngine::new(context, WorkerRegistry::new(worker), Arc::new(NullProvider));
        (engine, activity)
    }

    fn plan(phases: Vec<Phase>) -> Plan {
        let mut roles: Vec<AgentRole> = phases.iter().map(|p| p.required_role).collect();
        roles.sort();
        roles.dedup();
        Plan::new(phases, roles.into_iter().map(WorkerSpec::for_role).collect()).unwrap()
    }

    #[tokio::test]
    async fn acyclic_plan_completes_each_phase_once_after_dependencies() {
        let worker = Arc::new(RecordingWorker::default());
        let (engine, activity) = engine(worker.clone());
        let plan = plan(vec![
            Phase::new("a", AgentRole::Research),
            Phase::new("b", AgentRole::Code).depends_on(["a"]),
            Phase::new("c", AgentRole::Writer).depends_on(["a"]),
            Phase::new("d", AgentRole::Qa).depends_on(["b", "c"]),
        ]);

        let results = engine.execute(&plan).await.unwrap();

        assert_eq!(results.len(), 4);
        let finished = worker.finished.lock().unwrap().clone();
        assert_eq!(finished.len(), 4);
        let position = |name: &str| finished.iter().position(|p| p == name).unwrap();
        assert_eq!(position("a"), 0);
        assert!(position("d") > position("b"));
        assert!(position("d") > position("c"));

        let run_id = engine.context.run_id;
        assert_eq!(activity.events_for(run_id, ActivityKind::PhaseStart).len(), 4);
        assert_eq!(activity.events_for(run_id, ActivityKind::PhaseComplete).len(), 4);
    }

    #[tokio::test]
    async fn cycle_is_reported_as_deadlock() {
        let worker = Arc::new(RecordingWorker::default());
        let (engine, _) = engine(worker.clone());
        let plan = plan(vec![
            Phase::new("root", AgentRole::Code),
            Phase::new("x", AgentRole::Code).depends_on(["y"]),
            Phase::new("y", AgentRole::Code).depends_on(["x"]),
        ]);

        let err = engine.execute(&plan).await.unwrap_err();

        match err {
            AgentError::DependencyDeadlock { pending } => {
                assert_eq!(pending, vec!["x".to_string(), "y".to_string()]);
            }
            other => panic!("expected deadlock, got {other:?}"),
        }
        assert_eq!(worker.finished.lock().unwrap().as_slice(), ["root".to_string()]);
    }

    #[tokio::test]
    async fn unrecovered_failure_stops_dispatch_and_surfaces_exhaustion() {
        let worker = Arc::new(RecordingWorker {
            always_fail: vec!["b".to_string()],
            ..Default::default()
        });
        let (engine, activity) = engine(worker.clone());
        let plan = plan(vec![
            Phase::new("a", AgentRole::Code),
            Phase::new("b", AgentRole::Code).depends_on(["a"]),
            Phase::new("c", AgentRole::Code).depends_on(["b"]),
        ]);

        let err = engine.execute(&plan).await.unwrap_err();

        assert!(matches!(err, AgentError::RecoveryExhausted { ref phase, .. } if phase == "b"));
        assert_eq!(worker.finished.lock().unwrap().as_slice(), ["a".to_string()]);
        let run_id = engine.context.run_id;
        assert_eq!(activity.events_for(run_id, ActivityKind::Escalation).len(), 1);
        assert_eq!(activity.events_for(run_id, ActivityKind::PhaseError).len(), 2);
    }

    #[tokio::test]
    async fn running_siblings_drain_after_failure() {
        let worker = Arc::new(RecordingWorker {
            always_fail: vec!["bad".to_string()],
            ..Default::default()
        });
        let (engine, _) = engine(worker.clone());
        let plan = plan(vec![
            Phase::new("bad", AgentRole::Code),
            Phase::new("good", AgentRole::Writer),
            Phase::new("after", AgentRole::Writer).depends_on(["bad"]),
        ]);

        let err = engine.execute(&plan).await.unwrap_err();

        assert!(matches!(err, AgentError::RecoveryExhausted { .. }));
        assert_eq!(worker.finished.lock().unwrap().as_slice(), ["good".to_string()]);
    }

    #[tokio::test]
    async fn panicking_worker_is_recovered_like_any_failure() {
        let worker = Arc::new(RecordingWorker {
            panics: Mutex::new(HashMap::from([("flaky".to_string(), 1)])),
            ..Default::default()
        });
        let (engine, activity) = engine(worker.clone());
        let plan = plan(vec![Phase::new("flaky", AgentRole::Code)]);

        let results = engine.execute(&plan).await.unwrap();

        assert_eq!(results["flaky"]["phase"], "flaky");
        let run_id = engine.context.run_id;
        let errors = activity.events_for(run_id, ActivityKind::PhaseError);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].metadata["error_type"], PANIC_ERROR_TYPE);
        assert_eq!(activity.events_for(run_id, ActivityKind::RecoverySuccess).len(), 1);
    }

    #[tokio::test]
    async fn persistent_panic_escalates_with_the_phase_name() {
        let worker = Arc::new(RecordingWorker {
            panics: Mutex::new(HashMap::from([("boom".to_string(), usize::MAX)])),
            ..Default::default()
        });
        let (engine, activity) = engine(worker.clone());
        let plan = plan(vec![
            Phase::new("boom", AgentRole::Code),
            Phase::new("after", AgentRole::Writer).depends_on(["boom"]),
        ]);

        let err = engine.execute(&plan).await.unwrap_err();

        match err {
            AgentError::RecoveryExhausted { phase, source, .. } => {
                assert_eq!(phase, "boom");
                assert!(source.to_string().contains("worker bug in boom"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        let run_id = engine.context.run_id;
        assert_eq!(activity.events_for(run_id, ActivityKind::Escalation).len(), 1);
        assert_eq!(activity.events_for(run_id, ActivityKind::PhaseError).len(), 2);
        assert!(worker.finished.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn progress_reaches_full_when_every_phase_of_a_role_completes() {
        let worker = Arc::new(RecordingWorker::default());
        let (engine, activity) = engine(worker);
        let plan = plan(vec![
            Phase::new("a", AgentRole::Code),
            Phase::new("b", AgentRole::Code).depends_on(["a"]),
        ]);

        engine.execute(&plan).await.unwrap();

        let completions = activity.events_for(engine.context.run_id, ActivityKind::PhaseComplete);
        let progress: Vec<u64> = completions
            .iter()
            .map(|e| e.metadata["worker_progress"].as_u64().unwrap())
            .collect();
        assert_eq!(progress, vec![50, 100]);
    }
}
