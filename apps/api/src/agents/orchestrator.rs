// Run orchestration
//
// The orchestrator holds the collaborators that outlive a run (oracle,
// environment provider, worker registry, learned recovery patterns and the
// activity sink). Everything scoped to a single run lives in a fresh
// `RunContext` built at the start of that run.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::coordination::CoordinationManager;
use super::environment::EnvironmentProvider;
use super::errors::AgentResult;
use super::events::{ActivityEvent, ActivityKind, ActivitySink};
use super::manager::ManagerAgent;
use super::messages::MessageBus;
use super::oracle::ReasoningOracle;
use super::recovery::{PatternCache, RecoveryEngine};
use super::scheduler::ExecutionEngine;
use super::state::SharedStateStore;
use super::sync::SyncBarrier;
use super::types::{PhaseResults, Plan};
use super::worker::{OracleWorker, WorkerRegistry};
use crate::config::RuntimeConfig;

/// Per-run coordination objects
#[derive(Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub coordination: CoordinationManager,
    pub recovery: Arc<RecoveryEngine>,
    pub activity: ActivitySink,
    /// Upper bound for each environment command a worker runs
    pub command_timeout: Duration,
}

impl RunContext {
    pub fn new(
        run_id: Uuid,
        oracle: Arc<dyn ReasoningOracle>,
        activity: ActivitySink,
        patterns: PatternCache,
        config: &RuntimeConfig,
    ) -> Self {
        let bus = Arc::new(MessageBus::new(run_id, config.message_retention));
        let state = Arc::new(SharedStateStore::new(run_id, config.state_ttl));
        let coordination = CoordinationManager::new(bus.clone(), state, Arc::new(SyncBarrier::new()));
        let recovery = Arc::new(RecoveryEngine::new(
            run_id,
            oracle,
            bus,
            activity.clone(),
            patterns,
            config.recovery,
        ));

        Self {
            run_id,
            coordination,
            recovery,
            activity,
            command_timeout: config.command_timeout,
        }
    }
}

pub struct Orchestrator {
    oracle: Arc<dyn ReasoningOracle>,
    provider: Arc<dyn EnvironmentProvider>,
    registry: WorkerRegistry,
    patterns: PatternCache,
    activity: ActivitySink,
    config: RuntimeConfig,
}

impl Orchestrator {
    /// Orchestrator whose workers all delegate phases to the oracle
    pub fn new(
        oracle: Arc<dyn ReasoningOracle>,
        provider: Arc<dyn EnvironmentProvider>,
        activity: ActivitySink,
        config: RuntimeConfig,
    ) -> Self {
        let registry = WorkerRegistry::new(Arc::new(OracleWorker::new(oracle.clone())));
        Self {
            oracle,
            provider,
            registry,
            patterns: PatternCache::new(),
            activity,
            config,
        }
    }

    pub fn with_registry(mut self, registry: WorkerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Share an existing pattern cache, typically one loaded from storage
    pub fn with_patterns(mut self, patterns: PatternCache) -> Self {
        self.patterns = patterns;
        self
    }

    pub fn patterns(&self) -> &PatternCache {
        &self.patterns
    }

    pub fn activity(&self) -> &ActivitySink {
        &self.activity
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Ask the planner for a phase/worker decomposition
    pub async fn plan(&self, task_description: &str) -> AgentResult<Plan> {
        ManagerAgent::new(self.oracle.clone()).plan(task_description).await
    }

    pub fn run_context(&self, run_id: Uuid) -> RunContext {
        RunContext::new(
            run_id,
            self.oracle.clone(),
            self.activity.clone(),
            self.patterns.clone(),
            &self.config,
        )
    }

    /// Execute a plan in a fresh run context
    pub async fn execute(&self, run_id: Uuid, plan: &Plan) -> AgentResult<PhaseResults> {
        self.execute_in(self.run_context(run_id), plan).await
    }

    /// Execute a plan in a caller-provided run context
    pub async fn execute_in(&self, context: RunContext, plan: &Plan) -> AgentResult<PhaseResults> {
        let run_id = context.run_id;
        let activity = context.activity.clone();
        tracing::info!(run_id = %run_id, phases = plan.phases().len(), "Executing plan");

        let engine = ExecutionEngine::new(context, self.registry.clone(), self.provider.clone());
        let outcome = engine.execute(plan).await;

        match &outcome {
            Ok(results) => {
                activity
                    .emit(
                        ActivityEvent::new(run_id, ActivityKind::RunComplete, "Run completed")
                            .metadata(serde_json::json!({ "phases": results.len() })),
                    )
                    .await;
            }
            Err(e) => {
                activity
                    .emit(
                        ActivityEvent::new(run_id, ActivityKind::RunFailed, format!("Run failed: {e}"))
                            .metadata(serde_json::json!({ "error_kind": e.kind() })),
                    )
                    .await;
            }
        }

        outcome
    }

    /// Summarize run results
    pub async fn synthesize(&self, results: &PhaseResults) -> AgentResult<serde_json::Value> {
        ManagerAgent::new(self.oracle.clone()).synthesize(results).await
    }
}
