//! Crewline API Library
//!
//! Multi-worker task orchestration: a planner decomposes a task into a
//! dependency graph of phases, an execution engine runs them across role
//! workers, and a recovery engine retries failures with oracle-chosen
//! strategies. The HTTP API persists runs and their activity.

pub mod agents;
pub mod api;
pub mod config;
pub mod domain;
pub mod infrastructure;
