// Activity side channel
//
// Every scheduler and recovery transition is reported here. Persistence is
// best-effort: a failing repository never fails the run, but the failure is
// logged and kept as a diagnostic next to the recorded events.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::repositories::ActivityRepository;

/// Events kept in memory per sink
const RECENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    PhaseStart,
    PhaseComplete,
    PhaseError,
    ErrorReported,
    RecoveryAttempt,
    RecoverySuccess,
    Escalation,
    RunComplete,
    RunFailed,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::PhaseStart => "phase_start",
            ActivityKind::PhaseComplete => "phase_complete",
            ActivityKind::PhaseError => "phase_error",
            ActivityKind::ErrorReported => "error_reported",
            ActivityKind::RecoveryAttempt => "recovery_attempt",
            ActivityKind::RecoverySuccess => "recovery_success",
            ActivityKind::Escalation => "escalation",
            ActivityKind::RunComplete => "run_complete",
            ActivityKind::RunFailed => "run_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "phase_start" => ActivityKind::PhaseStart,
            "phase_complete" => ActivityKind::PhaseComplete,
            "phase_error" => ActivityKind::PhaseError,
            "error_reported" => ActivityKind::ErrorReported,
            "recovery_attempt" => ActivityKind::RecoveryAttempt,
            "recovery_success" => ActivityKind::RecoverySuccess,
            "escalation" => ActivityKind::Escalation,
            "run_complete" => ActivityKind::RunComplete,
            "run_failed" => ActivityKind::RunFailed,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: Uuid,
    pub run_id: Uuid,
    pub worker_id: Option<Uuid>,
    pub kind: ActivityKind,
    pub message: String,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(run_id: Uuid, kind: ActivityKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            worker_id: None,
            kind,
            message: message.into(),
            metadata: serde_json::json!({}),
            timestamp: Utc::now(),
        }
    }

    pub fn worker(mut self, worker_id: Uuid) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A persistence failure observed by the sink
#[derive(Debug, Clone)]
pub struct SinkFailure {
    pub event_id: Uuid,
    pub kind: ActivityKind,
    pub error: String,
    pub at: DateTime<Utc>,
}

#[derive(Default)]
struct SinkLog {
    events: VecDeque<ActivityEvent>,
    failures: Vec<SinkFailure>,
}

/// Best-effort activity recorder shared by every run
#[derive(Clone, Default)]
pub struct ActivitySink {
    repository: Option<Arc<dyn ActivityRepository>>,
    log: Arc<Mutex<SinkLog>>,
}

impl ActivitySink {
    pub fn new(repository: Option<Arc<dyn ActivityRepository>>) -> Self {
        Self {
            repository,
            log: Arc::default(),
        }
    }

    pub async fn emit(&self, event: ActivityEvent) {
        tracing::info!(
            run_id = %event.run_id,
            worker_id = ?event.worker_id,
            kind = %event.kind,
            "{}",
            event.message
        );

        if let Some(repository) = &self.repository {
            if let Err(error) = repository.record(&event).await {
                tracing::warn!(
                    run_id = %event.run_id,
                    kind = %event.kind,
                    error = %error,
                    "Failed to persist activity event"
                );
                self.with_log(|log| {
                    log.failures.push(SinkFailure {
                        event_id: event.id,
                        kind: event.kind,
                        error,
                        at: Utc::now(),
                    })
                });
            }
        }

        self.with_log(|log| {
            if log.events.len() == RECENT_CAPACITY {
                log.events.pop_front();
            }
            log.events.push_back(event);
        });
    }

    /// Recently emitted events, oldest first
    pub fn events(&self) -> Vec<ActivityEvent> {
        self.with_log(|log| log.events.iter().cloned().collect())
    }

    pub fn events_for(&self, run_id: Uuid, kind: ActivityKind) -> Vec<ActivityEvent> {
        self.with_log(|log| {
            log.events
                .iter()
                .filter(|e| e.run_id == run_id && e.kind == kind)
                .cloned()
                .collect()
        })
    }

    pub fn failures(&self) -> Vec<SinkFailure> {
        self.with_log(|log| log.failures.clone())
    }

    fn with_log<R>(&self, f: impl FnOnce(&mut SinkLog) -> R) -> R {
        let mut log = self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut log)
    }
}
