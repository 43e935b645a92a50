use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::agents::events::{ActivityEvent, ActivityKind};
use crate::domain::repositories::ActivityRepository;

#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: Uuid,
    run_id: Uuid,
    worker_id: Option<Uuid>,
    kind: String,
    message: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<ActivityRow> for ActivityEvent {
    type Error = String;

    fn try_from(r: ActivityRow) -> Result<Self, Self::Error> {
        let kind = ActivityKind::parse(&r.kind)
            .ok_or_else(|| format!("Unknown activity kind in database: {}", r.kind))?;
        Ok(ActivityEvent {
            id: r.id,
            run_id: r.run_id,
            worker_id: r.worker_id,
            kind,
            message: r.message,
            metadata: r.metadata,
            timestamp: r.created_at,
        })
    }
}

/// PostgreSQL implementation of ActivityRepository
pub struct PostgresActivityRepository {
    pool: PgPool,
}

impl PostgresActivityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityRepository for PostgresActivityRepository {
    async fn record(&self, event: &ActivityEvent) -> Result<(), String> {
        sqlx::query(
            r#"
            INSERT INTO activity_events (id, run_id, worker_id, kind, message, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id)
        .bind(event.run_id)
        .bind(event.worker_id)
        .bind(event.kind.as_str())
        .bind(&event.message)
        .bind(&event.metadata)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to record activity: {}", e))?;

        Ok(())
    }

    async fn find_by_run(&self, run_id: Uuid) -> Result<Vec<ActivityEvent>, String> {
        let rows: Vec<ActivityRow> = sqlx::query_as(
            r#"
            SELECT id, run_id, worker_id, kind, message, metadata, created_at
            FROM activity_events
            WHERE run_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| format!("Failed to find activity by run: {}", e))?;

        rows.into_iter().map(ActivityEvent::try_from).collect()
    }
}
