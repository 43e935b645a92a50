// Autonomous error recovery
//
// A failed phase produces an `ErrorReport`. The engine classifies it once,
// then loops: pick a strategy (learned pattern first, oracle otherwise),
// run its handler, and back off exponentially between failed attempts.
// When the attempt budget is spent the report is escalated exactly once
// and `RecoveryExhausted` is returned to the scheduler.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{AgentError, AgentResult};
use super::events::{ActivityEvent, ActivityKind, ActivitySink};
use super::messages::{Message, MessageBus, MessageType};
use super::oracle::{self, ReasoningOracle};
use super::prompts::library;
use super::types::AgentRole;
use super::worker::PhaseFailure;
use crate::domain::repositories::PatternRepository;

/// Sender id used for messages issued by the recovery engine
pub const RECOVERY_SENDER: &str = "recovery_system";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(ErrorSeverity::Low),
            "medium" => Some(ErrorSeverity::Medium),
            "high" => Some(ErrorSeverity::High),
            "critical" => Some(ErrorSeverity::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    Retry,
    AlternativeApproach,
    SimplifyTask,
    RequestHelp,
    RestartWorker,
    UseDifferentTool,
    EscalateToUser,
}

impl RecoveryStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        let strategy = match normalized.as_str() {
            "retry" => RecoveryStrategy::Retry,
            "alternative_approach" => RecoveryStrategy::AlternativeApproach,
            "simplify_task" => RecoveryStrategy::SimplifyTask,
            "request_help" => RecoveryStrategy::RequestHelp,
            "restart_worker" | "restart_agent" => RecoveryStrategy::RestartWorker,
            "use_different_tool" => RecoveryStrategy::UseDifferentTool,
            "escalate_to_user" => RecoveryStrategy::EscalateToUser,
            _ => return None,
        };
        Some(strategy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::AlternativeApproach => "alternative_approach",
            RecoveryStrategy::SimplifyTask => "simplify_task",
            RecoveryStrategy::RequestHelp => "request_help",
            RecoveryStrategy::RestartWorker => "restart_worker",
            RecoveryStrategy::UseDifferentTool => "use_different_tool",
            RecoveryStrategy::EscalateToUser => "escalate_to_user",
        }
    }
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure record owned by the recovery engine
///
/// Severity is fixed when the report is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    id: Uuid,
    worker_id: Uuid,
    role: AgentRole,
    run_id: Uuid,
    phase: String,
    message: String,
    error_type: String,
    severity: ErrorSeverity,
    context: serde_json::Map<String, serde_json::Value>,
    timestamp: DateTime<Utc>,
    strategies: Vec<RecoveryStrategy>,
    resolved: bool,
    resolution: Option<String>,
    escalated: bool,
    /// Error from the most recent failed recovery attempt
    last_attempt_error: Option<String>,
}

impl ErrorReport {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error_type(&self) -> &str {
        &self.error_type
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    pub fn context(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.context
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Strategies attempted so far, in order
    pub fn strategies(&self) -> &[RecoveryStrategy] {
        &self.strategies
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn resolution(&self) -> Option<&str> {
        self.resolution.as_deref()
    }

    pub fn is_escalated(&self) -> bool {
        self.escalated
    }

    pub fn last_attempt_error(&self) -> Option<&str> {
        self.last_attempt_error.as_deref()
    }

    /// The failure handed back when recovery gives up
    fn terminal_error(&self) -> AgentError {
        let message = match &self.last_attempt_error {
            Some(last) => format!("{} (last recovery attempt: {last})", self.message),
            None => self.message.clone(),
        };
        AgentError::PhaseExecution {
            phase: self.phase.clone(),
            message,
        }
    }
}

/// Summary returned by [`RecoveryEngine::error_status`]
#[derive(Debug, Clone, Serialize)]
pub struct ErrorStatus {
    pub error_id: Uuid,
    pub resolved: bool,
    pub resolution: Option<String>,
    pub attempts: usize,
    pub strategies_tried: Vec<RecoveryStrategy>,
    pub severity: ErrorSeverity,
}

/// A strategy that resolved an error pattern before
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub error_type: String,
    pub role: AgentRole,
    pub strategy: RecoveryStrategy,
    pub learned_at: DateTime<Utc>,
}

/// A learned pattern the repository refused to store
#[derive(Debug, Clone)]
pub struct PatternPersistFailure {
    pub error_type: String,
    pub role: AgentRole,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Learned `(error_type, role) -> strategy` associations
///
/// Cloning shares the underlying map, so one cache can serve many runs.
/// With a repository attached, learned patterns are written through on a
/// best-effort basis: the in-memory entry always wins and a failed write
/// is only kept as a diagnostic.
#[derive(Clone, Default)]
pub struct PatternCache {
    patterns: Arc<DashMap<(String, AgentRole), LearnedPattern>>,
    repository: Option<Arc<dyn PatternRepository>>,
    failures: Arc<Mutex<Vec<PatternPersistFailure>>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repository(mut self, repository: Arc<dyn PatternRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Seed a cache from everything the repository has learned so far
    pub async fn load(repository: Arc<dyn PatternRepository>) -> Result<Self, String> {
        let stored = repository.find_all().await?;
        let cache = Self::new().with_repository(repository);
        for pattern in stored {
            cache
                .patterns
                .insert((pattern.error_type.clone(), pattern.role), pattern);
        }
        tracing::info!(patterns = cache.len(), "Learned recovery patterns loaded");
        Ok(cache)
    }

    pub fn lookup(&self, error_type: &str, role: AgentRole) -> Option<RecoveryStrategy> {
        self.patterns
            .get(&(error_type.to_string(), role))
            .map(|p| p.strategy)
    }

    /// Record a pattern in memory only
    pub fn remember(&self, error_type: &str, role: AgentRole, strategy: RecoveryStrategy) -> LearnedPattern {
        let pattern = LearnedPattern {
            error_type: error_type.to_string(),
            role,
            strategy,
            learned_at: Utc::now(),
        };
        self.patterns
            .insert((error_type.to_string(), role), pattern.clone());
        pattern
    }

    /// Record a pattern and write it through to the repository
    pub async fn learn(&self, error_type: &str, role: AgentRole, strategy: RecoveryStrategy) {
        let pattern = self.remember(error_type, role, strategy);
        let Some(repository) = &self.repository else {
            return;
        };

        if let Err(error) = repository.save(&pattern).await {
            tracing::warn!(
                error_type,
                role = %role,
                strategy = %strategy,
                error = %error,
                "Failed to persist learned recovery pattern"
            );
            self.failures
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(PatternPersistFailure {
                    error_type: pattern.error_type,
                    role,
                    error,
                    at: Utc::now(),
                });
        }
    }

    /// Patterns ordered by error type, then role
    pub fn patterns(&self) -> Vec<LearnedPattern> {
        let mut patterns: Vec<LearnedPattern> = self.patterns.iter().map(|p| p.value().clone()).collect();
        patterns.sort_by(|a, b| (&a.error_type, a.role).cmp(&(&b.error_type, b.role)));
        patterns
    }

    pub fn persist_failures(&self) -> Vec<PatternPersistFailure> {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecoveryConfig {
    pub max_attempts: u32,
    /// Backoff after failed attempt `n` is `2^n` units
    pub backoff_unit: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RecoveryConfig {
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        self.backoff_unit * 2u32.saturating_pow(failed_attempts)
    }
}

/// Observes whether a recovery strategy fixed the failed work
///
/// The scheduler implements this by re-dispatching the phase with the
/// strategy's guidance.
#[async_trait]
pub trait RecoveryProbe: Send + Sync {
    /// Run the failed work again; `Ok` carries its output
    async fn attempt(
        &self,
        strategy: RecoveryStrategy,
        guidance: Option<serde_json::Value>,
    ) -> AgentResult<serde_json::Value>;

    /// Give the failing worker a fresh execution environment
    async fn restart(&self) -> AgentResult<()>;
}

#[derive(Deserialize)]
struct SeverityReply {
    severity: String,
}

#[derive(Deserialize)]
struct StrategyReply {
    strategy: String,
}

#[derive(Deserialize)]
struct HelperReply {
    role: String,
}

pub struct RecoveryEngine {
    run_id: Uuid,
    oracle: Arc<dyn ReasoningOracle>,
    bus: Arc<MessageBus>,
    activity: ActivitySink,
    patterns: PatternCache,
    config: RecoveryConfig,
    reports: DashMap<Uuid, ErrorReport>,
}

impl RecoveryEngine {
    pub fn new(
        run_id: Uuid,
        oracle: Arc<dyn ReasoningOracle>,
        bus: Arc<MessageBus>,
        activity: ActivitySink,
        patterns: PatternCache,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            run_id,
            oracle,
            bus,
            activity,
            patterns,
            config,
            reports: DashMap::new(),
        }
    }

    /// Create a report for a failed phase and classify it
    pub async fn report_error(
        &self,
        worker_id: Uuid,
        role: AgentRole,
        phase: &str,
        failure: PhaseFailure,
    ) -> ErrorReport {
        let severity = self.classify(&failure.message, &failure.error_type).await;

        let report = ErrorReport {
            id: Uuid::new_v4(),
            worker_id,
            role,
            run_id: self.run_id,
            phase: phase.to_string(),
            message: failure.message,
            error_type: failure.error_type,
            severity,
            context: failure.context,
            timestamp: Utc::now(),
            strategies: Vec::new(),
            resolved: false,
            resolution: None,
            escalated: false,
            last_attempt_error: None,
        };

        tracing::warn!(
            run_id = %self.run_id,
            error_id = %report.id,
            worker_id = %worker_id,
            role = %role,
            phase,
            error_type = %report.error_type,
            severity = report.severity.as_str(),
            "Error reported: {}",
            report.message
        );
        self.activity
            .emit(
                ActivityEvent::new(self.run_id, ActivityKind::ErrorReported, report.message.clone())
                    .worker(worker_id)
                    .metadata(serde_json::json!({
                        "error_id": report.id,
                        "phase": phase,
                        "error_type": report.error_type,
                        "severity": report.severity,
                    })),
            )
            .await;

        self.reports.insert(report.id, report.clone());
        report
    }

    /// Drive the recovery loop for a report until it resolves or exhausts
    pub async fn recover(
        &self,
        report_id: Uuid,
        probe: &dyn RecoveryProbe,
    ) -> AgentResult<serde_json::Value> {
        let mut failed_attempts = 0u32;

        while failed_attempts < self.config.max_attempts {
            let report = self
                .report(report_id)
                .ok_or_else(|| AgentError::AgentNotFound(format!("error report {report_id}")))?;
            if let Some(value) = manual_resolution(&report) {
                return Ok(value);
            }

            let strategy = self.select_strategy(&report, failed_attempts).await;
            if strategy == RecoveryStrategy::EscalateToUser {
                self.with_report(report_id, |r| r.strategies.push(strategy));
                break;
            }

            self.activity
                .emit(
                    ActivityEvent::new(
                        self.run_id,
                        ActivityKind::RecoveryAttempt,
                        format!("Attempting {strategy} for phase '{}'", report.phase),
                    )
                    .worker(report.worker_id)
                    .metadata(serde_json::json!({
                        "error_id": report_id,
                        "strategy": strategy,
                        "attempt": failed_attempts + 1,
                    })),
                )
                .await;

            match self.execute_strategy(&report, strategy, probe).await {
                Ok(value) => {
                    self.mark_recovered(&report, strategy).await;
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!(
                        run_id = %self.run_id,
                        error_id = %report_id,
                        strategy = %strategy,
                        error = %e,
                        "Recovery attempt failed"
                    );
                    self.with_report(report_id, |r| {
                        r.strategies.push(strategy);
                        r.last_attempt_error = Some(e.to_string());
                    });
                    failed_attempts += 1;
                    if failed_attempts < self.config.max_attempts {
                        tokio::time::sleep(self.config.backoff(failed_attempts)).await;
                    }
                }
            }
        }

        if let Some(value) = self.report(report_id).as_ref().and_then(manual_resolution) {
            return Ok(value);
        }

        Err(self.give_up(report_id).await)
    }

    /// Escalate a report without further attempts and build the terminal error
    pub async fn give_up(&self, report_id: Uuid) -> AgentError {
        self.escalate(report_id).await;

        match self.report(report_id) {
            Some(report) => AgentError::RecoveryExhausted {
                phase: report.phase.clone(),
                report_id,
                source: Box::new(report.terminal_error()),
            },
            None => AgentError::AgentNotFound(format!("error report {report_id}")),
        }
    }

    async fn classify(&self, message: &str, error_type: &str) -> ErrorSeverity {
        let prompt = library::severity_classification().render_with(&[
            ("message", message.to_string()),
            ("error_type", error_type.to_string()),
        ]);

        match oracle::ask_typed::<SeverityReply>(self.oracle.as_ref(), "severity", &prompt, 50).await {
            Ok(reply) => ErrorSeverity::parse(&reply.severity).unwrap_or(ErrorSeverity::Medium),
            Err(e) => {
                tracing::debug!(error = %e, "Severity classification fell back to medium");
                ErrorSeverity::Medium
            }
        }
    }

    async fn select_strategy(&self, report: &ErrorReport, attempt: u32) -> RecoveryStrategy {
        if let Some(strategy) = self.patterns.lookup(&report.error_type, report.role) {
            tracing::debug!(
                error_type = %report.error_type,
                role = %report.role,
                strategy = %strategy,
                "Using learned recovery strategy"
            );
            return strategy;
        }

        let tried: Vec<&str> = report.strategies.iter().map(|s| s.as_str()).collect();
        let prompt = library::strategy_selection().render_with(&[
            ("message", report.message.clone()),
            ("error_type", report.error_type.clone()),
            ("severity", report.severity.as_str().to_string()),
            ("role", report.role.to_string()),
            ("attempt", attempt.to_string()),
            ("tried", tried.join(", ")),
            ("context", context_json(report)),
        ]);

        match oracle::ask_typed::<StrategyReply>(self.oracle.as_ref(), "strategy", &prompt, 50).await {
            Ok(reply) => RecoveryStrategy::parse(&reply.strategy).unwrap_or(RecoveryStrategy::Retry),
            Err(e) => {
                tracing::debug!(error = %e, "Strategy selection fell back to retry");
                RecoveryStrategy::Retry
            }
        }
    }

    async fn execute_strategy(
        &self,
        report: &ErrorReport,
        strategy: RecoveryStrategy,
        probe: &dyn RecoveryProbe,
    ) -> AgentResult<serde_json::Value> {
        let guidance = match strategy {
            RecoveryStrategy::Retry => {
                self.instruct(
                    report,
                    serde_json::json!({
                        "action": "retry",
                        "error_id": report.id,
                        "retry_count": report.strategies.len() + 1,
                    }),
                )
                .await?;
                None
            }
            RecoveryStrategy::AlternativeApproach => {
                let alternative = self.ask_guidance(report, "alternative_approach").await?;
                self.instruct(
                    report,
                    serde_json::json!({
                        "action": "alternative_approach",
                        "error_id": report.id,
                        "alternative": alternative,
                    }),
                )
                .await?;
                Some(alternative)
            }
            RecoveryStrategy::SimplifyTask => {
                let subtasks = self.ask_guidance(report, "simplify_task").await?;
                self.instruct(
                    report,
                    serde_json::json!({
                        "action": "simplify_task",
                        "error_id": report.id,
                        "subtasks": subtasks,
                    }),
                )
                .await?;
                Some(serde_json::json!({ "subtasks": subtasks }))
            }
            RecoveryStrategy::UseDifferentTool => {
                let alternatives = self.ask_guidance(report, "use_different_tool").await?;
                self.instruct(
                    report,
                    serde_json::json!({
                        "action": "use_alternative_tool",
                        "error_id": report.id,
                        "alternatives": alternatives,
                    }),
                )
                .await?;
                Some(alternatives)
            }
            RecoveryStrategy::RequestHelp => {
                let helper = self.helper_role(report).await;
                let urgency = match report.severity {
                    ErrorSeverity::High | ErrorSeverity::Critical => "high",
                    _ => "normal",
                };
                self.bus
                    .request_help(
                        &report.worker_id.to_string(),
                        report.role,
                        &report.message,
                        helper.iter().map(|r| r.to_string()).collect(),
                        urgency,
                    )
                    .await?;
                Some(serde_json::json!({ "helper_role": helper }))
            }
            RecoveryStrategy::RestartWorker => {
                self.instruct(
                    report,
                    serde_json::json!({
                        "action": "restart",
                        "error_id": report.id,
                        "preserve_context": true,
                    }),
                )
                .await?;
                probe.restart().await?;
                None
            }
            RecoveryStrategy::EscalateToUser => {
                return Err(AgentError::PhaseExecution {
                    phase: report.phase.clone(),
                    message: "escalation is never executed automatically".to_string(),
                })
            }
        };

        match probe.attempt(strategy, guidance).await {
            Ok(value) => Ok(value),
            Err(e) => match self.report(report.id).as_ref().and_then(manual_resolution) {
                Some(value) => Ok(value),
                None => Err(e),
            },
        }
    }

    /// Publish a coordination instruction to the affected worker
    async fn instruct(&self, report: &ErrorReport, content: serde_json::Value) -> AgentResult<()> {
        let message = Message::builder(RECOVERY_SENDER, AgentRole::Orchestrator, MessageType::Coordination)
            .to_worker(report.worker_id)
            .content(content)
            .build()?;
        self.bus.publish(message).await;
        Ok(())
    }

    async fn ask_guidance(&self, report: &ErrorReport, kind: &str) -> AgentResult<serde_json::Value> {
        let (template, max_output) = match kind {
            "simplify_task" => (library::simplify_task(), 1000),
            "use_different_tool" => (library::use_different_tool(), 800),
            _ => (library::alternative_approach(), 1000),
        };
        let prompt = template.render_with(&[
            ("message", report.message.clone()),
            ("context", context_json(report)),
        ]);

        let reply = self.oracle.complete(&prompt, max_output).await?;
        oracle::extract_json(kind, &reply)
    }

    async fn helper_role(&self, report: &ErrorReport) -> Option<AgentRole> {
        let prompt = library::helper_role().render_with(&[
            ("message", report.message.clone()),
            ("role", report.role.to_string()),
            ("context", context_json(report)),
        ]);

        oracle::ask_typed::<HelperReply>(self.oracle.as_ref(), "helper_role", &prompt, 50)
            .await
            .ok()
            .and_then(|reply| AgentRole::normalize(&reply.role).ok())
    }

    async fn mark_recovered(&self, report: &ErrorReport, strategy: RecoveryStrategy) {
        self.with_report(report.id, |r| {
            r.strategies.push(strategy);
            r.resolved = true;
            r.resolution = Some(format!("Recovered using {strategy}"));
        });
        self.patterns.learn(&report.error_type, report.role, strategy).await;

        tracing::info!(
            run_id = %self.run_id,
            error_id = %report.id,
            phase = %report.phase,
            strategy = %strategy,
            "Recovered from error"
        );
        self.activity
            .emit(
                ActivityEvent::new(
                    self.run_id,
                    ActivityKind::RecoverySuccess,
                    format!("Phase '{}' recovered using {strategy}", report.phase),
                )
                .worker(report.worker_id)
                .metadata(serde_json::json!({
                    "error_id": report.id,
                    "error_type": report.error_type,
                    "strategy": strategy,
                })),
            )
            .await;
    }

    /// Fire the escalation side effects; later calls for the same report do nothing
    async fn escalate(&self, report_id: Uuid) {
        let first = self
            .reports
            .get_mut(&report_id)
            .map(|mut r| !std::mem::replace(&mut r.escalated, true))
            .unwrap_or(false);
        if !first {
            return;
        }
        let Some(report) = self.report(report_id) else {
            return;
        };

        let strategies: Vec<&str> = report.strategies.iter().map(|s| s.as_str()).collect();
        tracing::error!(
            run_id = %self.run_id,
            error_id = %report.id,
            worker_id = %report.worker_id,
            phase = %report.phase,
            attempts = report.strategies.len(),
            strategies = ?strategies,
            "Escalating unrecovered error: {}",
            report.message
        );

        self.activity
            .emit(
                ActivityEvent::new(
                    self.run_id,
                    ActivityKind::Escalation,
                    format!("Phase '{}' needs operator attention: {}", report.phase, report.message),
                )
                .worker(report.worker_id)
                .metadata(serde_json::json!({
                    "error_id": report.id,
                    "attempts_made": report.strategies.len(),
                    "strategies_tried": strategies,
                })),
            )
            .await;

        let notice = self
            .bus
            .coordinate_action(
                RECOVERY_SENDER,
                AgentRole::Orchestrator,
                "escalation",
                &[report.worker_id.to_string()],
                serde_json::json!({
                    "error_id": report.id,
                    "phase": report.phase,
                    "error_message": report.message,
                    "strategies_tried": strategies,
                }),
            )
            .await;
        if let Err(e) = notice {
            tracing::warn!(error = %e, "Failed to publish escalation notice");
        }
    }

    pub fn report(&self, report_id: Uuid) -> Option<ErrorReport> {
        self.reports.get(&report_id).map(|r| r.clone())
    }

    pub fn error_status(&self, report_id: Uuid) -> Option<ErrorStatus> {
        self.reports.get(&report_id).map(|r| ErrorStatus {
            error_id: r.id,
            resolved: r.resolved,
            resolution: r.resolution.clone(),
            attempts: r.strategies.len(),
            strategies_tried: r.strategies.clone(),
            severity: r.severity,
        })
    }

    /// Unresolved reports, oldest first
    pub fn active_errors(&self) -> Vec<ErrorReport> {
        let mut active: Vec<ErrorReport> = self
            .reports
            .iter()
            .filter(|r| !r.resolved)
            .map(|r| r.clone())
            .collect();
        active.sort_by_key(|r| r.timestamp);
        active
    }

    /// Mark a report resolved by an operator
    ///
    /// Manual resolutions are not learned as patterns.
    pub fn resolve_error(&self, report_id: Uuid, resolution: impl Into<String>) -> bool {
        let resolution = resolution.into();
        self.with_report(report_id, |r| {
            r.resolved = true;
            r.resolution = Some(resolution);
        })
        .is_some()
    }

    pub fn learned_patterns(&self) -> Vec<LearnedPattern> {
        self.patterns.patterns()
    }

    fn with_report<R>(&self, report_id: Uuid, f: impl FnOnce(&mut ErrorReport) -> R) -> Option<R> {
        self.reports.get_mut(&report_id).map(|mut r| f(&mut r))
    }
}

fn manual_resolution(report: &ErrorReport) -> Option<serde_json::Value> {
    report.resolved.then(|| {
        serde_json::json!({
            "resolved_manually": true,
            "resolution": report.resolution,
        })
    })
}

fn context_json(report: &ErrorReport) -> String {
    serde_json::to_string_pretty(&report.context).unwrap_or_else(|_| "{}".to_string())
}
