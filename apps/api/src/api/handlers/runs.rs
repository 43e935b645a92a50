use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::events::ActivityEvent;
use crate::agents::types::{PhaseResults, Plan};
use crate::api::errors::ApiError;
use crate::api::state::AppState;
use crate::domain::run::Run;

/// Request body for creating a run
#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    pub task_description: String,
    pub project_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub task_description: String,
    pub status: String,
    pub plan: Option<Plan>,
    pub results: PhaseResults,
    pub summary: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Run> for RunResponse {
    fn from(run: &Run) -> Self {
        Self {
            id: run.id(),
            project_id: run.project_id(),
            task_description: run.task_description().to_string(),
            status: run.status().to_string(),
            plan: run.plan().cloned(),
            results: run.results().clone(),
            summary: run.summary().cloned(),
            error: run.error().map(str::to_string),
            created_at: run.created_at(),
            started_at: run.started_at(),
            completed_at: run.completed_at(),
        }
    }
}

async fn save(state: &AppState, run: &Run) -> Result<(), ApiError> {
    state
        .runs
        .save(run)
        .await
        .map_err(|e| ApiError::internal_server_error(format!("Failed to save run: {}", e)))
}

async fn load(state: &AppState, id: Uuid) -> Result<Run, ApiError> {
    state
        .runs
        .find_by_id(id)
        .await
        .map_err(|e| ApiError::internal_server_error(format!("Database error: {}", e)))?
        .ok_or_else(|| ApiError::not_found(format!("Run not found: {}", id)))
}

/// Plan a new run
///
/// POST /api/runs
///
/// The run is persisted before planning starts, so a planning failure
/// leaves a failed run behind and returns the planning error.
pub async fn create_run(
    State(state): State<AppState>,
    Json(req): Json<CreateRunRequest>,
) -> Result<(StatusCode, Json<RunResponse>), ApiError> {
    let (mut run, _events) =
        Run::new(req.project_id, req.task_description).map_err(ApiError::bad_request)?;
    run.start_planning().map_err(ApiError::conflict)?;
    save(&state, &run).await?;

    tracing::info!(run_id = %run.id(), project_id = %run.project_id(), "Planning run");

    let planned = state.orchestrator.plan(run.task_description()).await;
    match planned {
        Ok(plan) => {
            run.attach_plan(plan).map_err(ApiError::conflict)?;
            save(&state, &run).await?;
            Ok((StatusCode::CREATED, Json(RunResponse::from(&run))))
        }
        Err(e) => {
            tracing::warn!(run_id = %run.id(), error = %e, "Planning failed");
            run.fail(e.to_string()).map_err(ApiError::conflict)?;
            save(&state, &run).await?;
            Err(e.into())
        }
    }
}

/// Execute a planned run
///
/// POST /api/runs/:id/execute
pub async fn execute_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunResponse>, ApiError> {
    let mut run = load(&state, id).await?;
    run.start_execution().map_err(ApiError::conflict)?;
    let plan = run
        .plan()
        .cloned()
        .ok_or_else(|| ApiError::conflict("Run has no plan"))?;
    save(&state, &run).await?;

    let outcome = state.orchestrator.execute(run.id(), &plan).await;
    match outcome {
        Ok(results) => {
            // Summary is best-effort; the results stand on their own.
            let summary = match state.orchestrator.synthesize(&results).await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    tracing::warn!(run_id = %run.id(), error = %e, "Result synthesis failed");
                    None
                }
            };
            run.complete(results, summary).map_err(ApiError::conflict)?;
            save(&state, &run).await?;
            Ok(Json(RunResponse::from(&run)))
        }
        Err(e) => {
            run.fail(e.to_string()).map_err(ApiError::conflict)?;
            save(&state, &run).await?;
            Err(e.into())
        }
    }
}

/// GET /api/runs/:id
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunResponse>, ApiError> {
    let run = load(&state, id).await?;
    Ok(Json(RunResponse::from(&run)))
}

/// GET /api/runs/project/:project_id
pub async fn get_runs_by_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<Vec<RunResponse>>, ApiError> {
    let runs = state
        .runs
        .find_by_project(project_id)
        .await
        .map_err(|e| ApiError::internal_server_error(format!("Database error: {}", e)))?;

    Ok(Json(runs.iter().map(RunResponse::from).collect()))
}

/// Activity recorded for a run, in emission order
///
/// GET /api/runs/:id/activity
pub async fn get_run_activity(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ActivityEvent>>, ApiError> {
    load(&state, id).await?;
    let events = state
        .activity
        .find_by_run(id)
        .await
        .map_err(|e| ApiError::internal_server_error(format!("Database error: {}", e)))?;

    Ok(Json(events))
}

/// DELETE /api/runs/:id
pub async fn delete_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.runs.delete(id).await.map_err(|e| {
        if e.contains("not found") {
            ApiError::not_found(e)
        } else {
            ApiError::internal_server_error(format!("Failed to delete run: {}", e))
        }
    })?;

    Ok(StatusCode::NO_CONTENT)
}

/// Health check endpoint
///
/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}
