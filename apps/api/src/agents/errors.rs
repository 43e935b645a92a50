use thiserror::Error;

/// Errors that can occur in the agent system
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Malformed oracle response for {context}: {reason}")]
    MalformedResponse { context: String, reason: String },

    #[error("Execution deadlock: no phases ready to execute (pending: {})", pending.join(", "))]
    DependencyDeadlock { pending: Vec<String> },

    #[error("Phase '{phase}' failed: {message}")]
    PhaseExecution { phase: String, message: String },

    #[error("Recovery exhausted for phase '{phase}' (report {report_id})")]
    RecoveryExhausted {
        phase: String,
        report_id: uuid::Uuid,
        #[source]
        source: Box<AgentError>,
    },

    #[error("Sync point not found: {0}")]
    SyncPointNotFound(String),

    #[error("Unknown agent role: {0}")]
    UnknownRole(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Execution environment error: {0}")]
    Environment(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AgentError {
    /// Short machine-readable classification used as the recovery pattern key
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Planning(_) => "planning",
            AgentError::MalformedResponse { .. } => "malformed_response",
            AgentError::DependencyDeadlock { .. } => "dependency_deadlock",
            AgentError::PhaseExecution { .. } => "phase_execution",
            AgentError::RecoveryExhausted { .. } => "recovery_exhausted",
            AgentError::SyncPointNotFound(_) => "sync_point_not_found",
            AgentError::UnknownRole(_) => "unknown_role",
            AgentError::Oracle(_) => "oracle",
            AgentError::Environment(_) => "environment",
            AgentError::JsonError(_) => "json",
            AgentError::AgentNotFound(_) => "agent_not_found",
            AgentError::InvalidStateTransition { .. } => "invalid_state_transition",
            AgentError::InvalidMessage(_) => "invalid_message",
            AgentError::Persistence(_) => "persistence",
            AgentError::ConfigError(_) => "config",
        }
    }

    pub(crate) fn malformed(context: impl Into<String>, reason: impl Into<String>) -> Self {
        AgentError::MalformedResponse {
            context: context.into(),
            reason: reason.into(),
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn deadlock_message_lists_pending_phases() {
        let err = AgentError::DependencyDeadlock {
            pending: vec!["build".to_string(), "test".to_string()],
        };

        assert!(err.to_string().contains("build, test"));
        assert_eq!(err.kind(), "dependency_deadlock");
    }

    #[test]
    fn recovery_exhausted_keeps_original_error_as_source() {
        let err = AgentError::RecoveryExhausted {
            phase: "deploy".to_string(),
            report_id: uuid::Uuid::new_v4(),
            source: Box::new(AgentError::PhaseExecution {
                phase: "deploy".to_string(),
                message: "timeout".to_string(),
            }),
        };

        let source = err.source().expect("source error");
        assert!(source.to_string().contains("timeout"));
    }
}
