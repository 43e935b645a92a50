use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use crewline_api::agents::environment::LocalEnvironmentProvider;
use crewline_api::agents::events::ActivitySink;
use crewline_api::agents::recovery::PatternCache;
use crewline_api::agents::Orchestrator;
use crewline_api::api::{self, AppState};
use crewline_api::config::Settings;
use crewline_api::domain::repositories::{ActivityRepository, PatternRepository, RunRepository};
use crewline_api::infrastructure::llm::AnthropicOracle;
use crewline_api::infrastructure::repositories::{
    InMemoryActivityRepository, InMemoryPatternRepository, InMemoryRunRepository,
    PostgresActivityRepository, PostgresPatternRepository, PostgresRunRepository,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    // Load configuration (.env first, then process environment)
    let settings = Settings::from_env().expect("Invalid configuration");

    let (runs, activity, patterns): (
        Arc<dyn RunRepository>,
        Arc<dyn ActivityRepository>,
        Arc<dyn PatternRepository>,
    ) = match &settings.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await
                .expect("Failed to connect to database");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations");

            tracing::info!("Database connected successfully");
            let runs: Arc<dyn RunRepository> = Arc::new(PostgresRunRepository::new(pool.clone()));
            let activity: Arc<dyn ActivityRepository> =
                Arc::new(PostgresActivityRepository::new(pool.clone()));
            let patterns: Arc<dyn PatternRepository> = Arc::new(PostgresPatternRepository::new(pool));
            (runs, activity, patterns)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, runs are kept in memory");
            let runs: Arc<dyn RunRepository> = Arc::new(InMemoryRunRepository::new());
            let activity: Arc<dyn ActivityRepository> = Arc::new(InMemoryActivityRepository::new());
            let patterns: Arc<dyn PatternRepository> = Arc::new(InMemoryPatternRepository::new());
            (runs, activity, patterns)
        }
    };

    // Learned recovery patterns survive restarts; a broken store only costs the history
    let patterns = match PatternCache::load(patterns.clone()).await {
        Ok(cache) => cache,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load learned recovery patterns, starting empty");
            PatternCache::new().with_repository(patterns)
        }
    };

    let oracle = Arc::new(AnthropicOracle::new(
        settings.anthropic_api_key.clone(),
        settings.oracle_model.clone(),
    ));
    let provider = Arc::new(LocalEnvironmentProvider::new(settings.workspace_root.clone()));
    let orchestrator = Orchestrator::new(
        oracle,
        provider,
        ActivitySink::new(Some(activity.clone())),
        settings.runtime.clone(),
    )
    .with_patterns(patterns);

    let app = api::router(AppState::new(orchestrator, runs, activity));

    // Start server
    tracing::info!(model = %settings.oracle_model, "Server listening on {}", settings.bind_addr);

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Server failed");
}
