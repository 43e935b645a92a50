// Repository ports
// Implemented in the infrastructure layer

pub mod activity_repository;
pub mod pattern_repository;
pub mod run_repository;

pub use activity_repository::ActivityRepository;
pub use pattern_repository::PatternRepository;
pub use run_repository::RunRepository;
