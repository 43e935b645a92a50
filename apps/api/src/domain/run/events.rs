use uuid::Uuid;

/// Domain events emitted by the Run aggregate
///
/// # Example
/// ```
/// use crewline_api::domain::run::events::RunEvent;
/// use uuid::Uuid;
///
/// let run_id = Uuid::new_v4();
/// let event = RunEvent::Started { run_id };
/// assert_eq!(event.run_id(), run_id);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Created {
        run_id: Uuid,
        project_id: Uuid,
        task_description: String,
    },
    PlanningStarted {
        run_id: Uuid,
    },
    Planned {
        run_id: Uuid,
        phases: usize,
        estimated_duration: u32,
    },
    Started {
        run_id: Uuid,
    },
    Completed {
        run_id: Uuid,
        phases: usize,
    },
    Failed {
        run_id: Uuid,
        reason: String,
    },
    Archived {
        run_id: Uuid,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            RunEvent::Created { run_id, .. }
            | RunEvent::PlanningStarted { run_id }
            | RunEvent::Planned { run_id, .. }
            | RunEvent::Started { run_id }
            | RunEvent::Completed { run_id, .. }
            | RunEvent::Failed { run_id, .. }
            | RunEvent::Archived { run_id } => *run_id,
        }
    }
}
