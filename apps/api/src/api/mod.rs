// API layer module (adapters for controllers)
// Follows Hexagonal Architecture - API is an adapter

pub mod errors;
pub mod handlers;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use handlers::{patterns, runs};
pub use state::AppState;

/// Build the application router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(runs::health_check))
        // Run routes
        .route("/api/runs", post(runs::create_run))
        .route("/api/runs/:id", get(runs::get_run).delete(runs::delete_run))
        .route("/api/runs/:id/execute", post(runs::execute_run))
        .route("/api/runs/:id/activity", get(runs::get_run_activity))
        .route("/api/runs/project/:project_id", get(runs::get_runs_by_project))
        // Learned recovery patterns
        .route("/api/patterns", get(patterns::list_patterns))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Shared state
        .with_state(state)
}
