//! Shared fixtures for integration tests
//!
//! A scripted oracle, an in-process environment provider and a worker whose
//! failures can be scheduled per phase.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use crewline_api::agents::environment::{CommandOutput, EnvironmentProvider, ExecutionEnvironment};
use crewline_api::agents::errors::{AgentError, AgentResult};
use crewline_api::agents::events::ActivitySink;
use crewline_api::agents::recovery::RecoveryConfig;
use crewline_api::agents::worker::{PhaseContext, PhaseFailure, Worker, WorkerRegistry};
use crewline_api::agents::{AgentRole, Orchestrator, Phase, Plan, ReasoningOracle, WorkerSpec};
use crewline_api::config::RuntimeConfig;
use uuid::Uuid;

pub const GOAL_REPLY: &str = r#"{"primary_goal": "Ship it", "required_capabilities": ["coding"]}"#;
pub const SUMMARY_REPLY: &str = r#"{"executive_summary": "all phases done"}"#;

/// Oracle that answers each prompt family from a script
pub struct ScriptedOracle {
    decomposition: String,
    strategies: Mutex<VecDeque<String>>,
    pub strategy_calls: AtomicUsize,
    pub severity_calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new(decomposition: impl Into<String>) -> Self {
        Self {
            decomposition: decomposition.into(),
            strategies: Mutex::new(VecDeque::new()),
            strategy_calls: AtomicUsize::new(0),
            severity_calls: AtomicUsize::new(0),
        }
    }

    /// Queue strategy names; once exhausted the oracle answers `retry`
    pub fn with_strategies(self, strategies: &[&str]) -> Self {
        *self.strategies.lock().unwrap() = strategies.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn strategy_calls(&self) -> usize {
        self.strategy_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningOracle for ScriptedOracle {
    async fn complete(&self, prompt: &str, _max_output: u32) -> AgentResult<String> {
        if prompt.contains("executable phases") {
            return Ok(self.decomposition.clone());
        }
        if prompt.contains("Synthesize") {
            return Ok(SUMMARY_REPLY.to_string());
        }
        if prompt.contains("Classify as") {
            self.severity_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(r#"{"severity": "medium"}"#.to_string());
        }
        if prompt.contains("Available Strategies") {
            self.strategy_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.strategies.lock().unwrap().pop_front();
            let strategy = next.unwrap_or_else(|| "retry".to_string());
            return Ok(format!("```json\n{{\"strategy\": \"{strategy}\"}}\n```"));
        }
        if prompt.contains("Task:") {
            return Ok(GOAL_REPLY.to_string());
        }
        Err(AgentError::Oracle("no scripted reply".to_string()))
    }
}

/// Environment that keeps files in memory and never runs anything
#[derive(Default)]
pub struct MemoryEnvironment {
    id: String,
    files: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl ExecutionEnvironment for MemoryEnvironment {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, _command: &str, _timeout: Duration) -> AgentResult<CommandOutput> {
        Ok(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    async fn read_file(&self, path: &str) -> AgentResult<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| AgentError::Environment(format!("no such file: {path}")))
    }

    async fn write_file(&self, path: &str, content: &str) -> AgentResult<()> {
        self.files.lock().unwrap().insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn close(&self) -> AgentResult<()> {
        Ok(())
    }
}

/// Counts every environment it hands out
#[derive(Default)]
pub struct MemoryProvider {
    pub provisioned: AtomicUsize,
}

impl MemoryProvider {
    pub fn provisioned(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnvironmentProvider for MemoryProvider {
    async fn provision(
        &self,
        worker_id: Uuid,
        role: AgentRole,
    ) -> AgentResult<Arc<dyn ExecutionEnvironment>> {
        self.provisioned.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryEnvironment {
            id: format!("{role}-{worker_id}"),
            ..Default::default()
        }))
    }
}

/// Worker that logs start/end markers and fails scheduled phases
#[derive(Default)]
pub struct ScriptedWorker {
    /// phase name -> (error_type, remaining failures)
    failures: Mutex<HashMap<String, (String, usize)>>,
    timeline: Mutex<Vec<String>>,
    attempts: Mutex<HashMap<String, usize>>,
}

impl ScriptedWorker {
    /// Fail `phase` with `error_type` for the next `times` dispatches
    pub fn fail(self, phase: &str, error_type: &str, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(phase.to_string(), (error_type.to_string(), times));
        self
    }

    /// Arm another round of failures on an existing worker
    pub fn fail_again(&self, phase: &str, error_type: &str, times: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert(phase.to_string(), (error_type.to_string(), times));
    }

    pub fn timeline(&self) -> Vec<String> {
        self.timeline.lock().unwrap().clone()
    }

    pub fn attempts(&self, phase: &str) -> usize {
        self.attempts.lock().unwrap().get(phase).copied().unwrap_or(0)
    }

    pub fn position(&self, marker: &str) -> usize {
        self.timeline()
            .iter()
            .position(|m| m == marker)
            .unwrap_or_else(|| panic!("{marker} never happened"))
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn execute_phase(
        &self,
        phase: &Phase,
        ctx: &PhaseContext,
    ) -> Result<serde_json::Value, PhaseFailure> {
        *self.attempts.lock().unwrap().entry(phase.name.clone()).or_default() += 1;
        self.timeline.lock().unwrap().push(format!("start:{}", phase.name));
        tokio::time::sleep(Duration::from_millis(5)).await;

        let failure = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&phase.name) {
                Some((error_type, left)) if *left > 0 => {
                    *left -= 1;
                    Some(error_type.clone())
                }
                _ => None,
            }
        };
        if let Some(error_type) = failure {
            return Err(PhaseFailure::new(error_type, format!("{} failed", phase.name)));
        }

        self.timeline.lock().unwrap().push(format!("end:{}", phase.name));
        Ok(serde_json::json!({
            "phase": phase.name,
            "attempt": ctx.attempt,
            "inputs": ctx.dependency_results.keys().cloned().collect::<Vec<_>>(),
        }))
    }
}

pub fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        recovery: RecoveryConfig {
            max_attempts: 3,
            backoff_unit: Duration::from_millis(1),
        },
        ..Default::default()
    }
}

pub fn orchestrator(
    oracle: Arc<ScriptedOracle>,
    worker: Arc<ScriptedWorker>,
    provider: Arc<MemoryProvider>,
    activity: ActivitySink,
) -> Orchestrator {
    Orchestrator::new(oracle, provider, activity, fast_config())
        .with_registry(WorkerRegistry::new(worker))
}

/// Plan with one worker spec per role used by `phases`
pub fn plan(phases: Vec<Phase>) -> Plan {
    let mut roles: Vec<AgentRole> = phases.iter().map(|p| p.required_role).collect();
    roles.sort();
    roles.dedup();
    Plan::new(phases, roles.into_iter().map(WorkerSpec::for_role).collect()).unwrap()
}
