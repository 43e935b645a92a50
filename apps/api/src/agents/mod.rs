// Agent system modules
//
// Planning, scheduling, coordination and recovery for multi-worker runs.
// Everything here talks to the outside world through the `ReasoningOracle`
// and `EnvironmentProvider` seams.

pub mod coordination;
pub mod environment;
pub mod errors;
pub mod events;
pub mod manager;
pub mod messages;
pub mod oracle;
pub mod orchestrator;
pub mod prompts;
pub mod recovery;
pub mod scheduler;
pub mod state;
pub mod sync;
pub mod types;
pub mod worker;

// Re-export main types
pub use errors::{AgentError, AgentResult};
pub use manager::ManagerAgent;
pub use oracle::ReasoningOracle;
pub use orchestrator::{Orchestrator, RunContext};
pub use types::{AgentRole, GoalAnalysis, Phase, PhaseResults, Plan, WorkerSpec};
pub use worker::{Worker, WorkerRegistry};
