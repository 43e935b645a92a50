use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::agents::recovery::{LearnedPattern, RecoveryStrategy};
use crate::agents::types::AgentRole;
use crate::domain::repositories::PatternRepository;

#[derive(sqlx::FromRow)]
struct PatternRow {
    error_type: String,
    role: String,
    strategy: String,
    learned_at: DateTime<Utc>,
}

impl TryFrom<PatternRow> for LearnedPattern {
    type Error = String;

    fn try_from(r: PatternRow) -> Result<Self, Self::Error> {
        let role = AgentRole::normalize(&r.role).map_err(|e| e.to_string())?;
        let strategy = RecoveryStrategy::parse(&r.strategy)
            .ok_or_else(|| format!("Unknown recovery strategy in database: {}", r.strategy))?;
        Ok(LearnedPattern {
            error_type: r.error_type,
            role,
            strategy,
            learned_at: r.learned_at,
        })
    }
}

/// PostgreSQL implementation of PatternRepository
pub struct PostgresPatternRepository {
    pool: PgPool,
}

impl PostgresPatternRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PatternRepository for PostgresPatternRepository {
    async fn save(&self, pattern: &LearnedPattern) -> Result<(), String> {
        sqlx::query(
            r#"
            INSERT INTO recovery_patterns (error_type, role, strategy, learned_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (error_type, role) DO UPDATE SET
                strategy = EXCLUDED.strategy,
                learned_at = EXCLUDED.learned_at
            "#,
        )
        .bind(&pattern.error_type)
        .bind(pattern.role.as_str())
        .bind(pattern.strategy.as_str())
        .bind(pattern.learned_at)
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to save recovery pattern: {}", e))?;

        Ok(())
    }

    async fn find_all(&self) -> Result<Vec<LearnedPattern>, String> {
        let rows: Vec<PatternRow> = sqlx::query_as(
            r#"
            SELECT error_type, role, strategy, learned_at
            FROM recovery_patterns
            ORDER BY error_type, role
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| format!("Failed to load recovery patterns: {}", e))?;

        rows.into_iter().map(LearnedPattern::try_from).collect()
    }
}
