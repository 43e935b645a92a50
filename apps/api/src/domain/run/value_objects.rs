use serde::{Deserialize, Serialize};

/// Lifecycle status of a run
///
/// # Status Transitions
/// ```text
/// Pending -> Planning -> Executing -> Completed -> Archived
///               |            └-----> Failed ----> Archived
///               └------------------> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "run_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run was created but planning has not begun
    Pending,
    /// The planner is decomposing the task
    Planning,
    /// Phases are being executed
    Executing,
    /// Every phase completed
    Completed,
    /// Planning or execution failed
    Failed,
    /// Run is archived
    Archived,
}

impl RunStatus {
    /// Checks if a transition from current status to next status is valid
    ///
    /// # Example
    /// ```
    /// use crewline_api::domain::run::value_objects::RunStatus;
    ///
    /// assert!(RunStatus::Pending.can_transition_to(RunStatus::Planning));
    /// assert!(!RunStatus::Pending.can_transition_to(RunStatus::Executing));
    /// ```
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Pending, Planning)
                | (Planning, Executing)
                | (Planning, Failed)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Completed, Archived)
                | (Failed, Archived)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Archived)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Planning => write!(f, "planning"),
            RunStatus::Executing => write!(f, "executing"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Archived => write!(f, "archived"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Planning));
        assert!(RunStatus::Planning.can_transition_to(RunStatus::Executing));
        assert!(RunStatus::Executing.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::Completed.can_transition_to(RunStatus::Archived));
    }

    #[test]
    fn failure_transitions() {
        assert!(RunStatus::Planning.can_transition_to(RunStatus::Failed));
        assert!(RunStatus::Executing.can_transition_to(RunStatus::Failed));
        assert!(RunStatus::Failed.can_transition_to(RunStatus::Archived));
        assert!(!RunStatus::Pending.can_transition_to(RunStatus::Failed));
    }

    #[test]
    fn invalid_transitions() {
        assert!(!RunStatus::Pending.can_transition_to(RunStatus::Executing));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Executing));
        assert!(!RunStatus::Archived.can_transition_to(RunStatus::Pending));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Executing));
    }

    #[test]
    fn terminal_states() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Executing.is_terminal());
    }

    #[test]
    fn status_display() {
        assert_eq!(RunStatus::Pending.to_string(), "pending");
        assert_eq!(RunStatus::Executing.to_string(), "executing");
        assert_eq!(RunStatus::Archived.to_string(), "archived");
    }
}
