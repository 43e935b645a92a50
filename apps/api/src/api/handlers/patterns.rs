use axum::{extract::State, Json};

use crate::agents::recovery::LearnedPattern;
use crate::api::state::AppState;

/// Recovery strategies learned so far, ordered by error type and role
///
/// GET /api/patterns
pub async fn list_patterns(State(state): State<AppState>) -> Json<Vec<LearnedPattern>> {
    Json(state.orchestrator.patterns().patterns())
}
