// Run domain module
// Contains the run aggregate root, its status value object, and domain events

#![allow(clippy::module_inception)]

pub mod events;
pub mod run;
pub mod value_objects;

pub use events::RunEvent;
pub use run::Run;
pub use value_objects::RunStatus;
