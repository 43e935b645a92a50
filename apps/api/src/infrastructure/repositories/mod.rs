// Repository implementations (data access layer)
// Adapters that implement domain repository interfaces

pub mod in_memory;
pub mod postgres_activity_repository;
pub mod postgres_pattern_repository;
pub mod postgres_run_repository;

pub use in_memory::{InMemoryActivityRepository, InMemoryPatternRepository, InMemoryRunRepository};
pub use postgres_activity_repository::PostgresActivityRepository;
pub use postgres_pattern_repository::PostgresPatternRepository;
pub use postgres_run_repository::PostgresRunRepository;
