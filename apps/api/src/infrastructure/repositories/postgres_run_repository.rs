use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::agents::types::{PhaseResults, Plan};
use crate::domain::repositories::RunRepository;
use crate::domain::run::value_objects::RunStatus;
use crate::domain::run::Run;

const SELECT_RUN: &str = r#"
    SELECT
        id, project_id, task_description, status,
        plan, results, summary, error,
        created_at, started_at, completed_at
    FROM runs
"#;

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    project_id: Uuid,
    task_description: String,
    status: RunStatus,
    plan: Option<Json<Plan>>,
    results: Json<PhaseResults>,
    summary: Option<serde_json::Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl From<RunRow> for Run {
    fn from(r: RunRow) -> Self {
        Run::from_persistence(
            r.id,
            r.project_id,
            r.task_description,
            r.status,
            r.plan.map(|p| p.0),
            r.results.0,
            r.summary,
            r.error,
            r.created_at,
            r.started_at,
            r.completed_at,
        )
    }
}

/// PostgreSQL implementation of RunRepository
///
/// Plans and phase results are stored as JSONB.
pub struct PostgresRunRepository {
    pool: PgPool,
}

impl PostgresRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunRepository for PostgresRunRepository {
    async fn save(&self, run: &Run) -> Result<(), String> {
        sqlx::query(
            r#"
            INSERT INTO runs (
                id, project_id, task_description, status, plan, results,
                summary, error, created_at, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                plan = EXCLUDED.plan,
                results = EXCLUDED.results,
                summary = EXCLUDED.summary,
                error = EXCLUDED.error,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(run.id())
        .bind(run.project_id())
        .bind(run.task_description())
        .bind(run.status())
        .bind(run.plan().map(Json))
        .bind(Json(run.results()))
        .bind(run.summary())
        .bind(run.error())
        .bind(run.created_at())
        .bind(run.started_at())
        .bind(run.completed_at())
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to save run: {}", e))?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Run>, String> {
        let row: Option<RunRow> = sqlx::query_as(&format!("{SELECT_RUN} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| format!("Failed to find run by id: {}", e))?;

        Ok(row.map(Run::from))
    }

    async fn find_by_project(&self, project_id: Uuid) -> Result<Vec<Run>, String> {
        let rows: Vec<RunRow> = sqlx::query_as(&format!(
            "{SELECT_RUN} WHERE project_id = $1 ORDER BY created_at DESC"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| format!("Failed to find runs by project: {}", e))?;

        Ok(rows.into_iter().map(Run::from).collect())
    }

    async fn delete(&self, id: Uuid) -> Result<(), String> {
        let result = sqlx::query("DELETE FROM runs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| format!("Failed to delete run: {}", e))?;

        if result.rows_affected() == 0 {
            return Err(format!("Run not found: {}", id));
        }

        Ok(())
    }
}
