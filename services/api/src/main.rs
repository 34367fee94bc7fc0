use anyhow::Result;
use std::{env, sync::Arc};
use tracing::info;
use tracing_subscriber::FmtSubscriber;

mod error;
mod middleware;
mod models;
mod routes;
mod state;

use common::{
    cache::{RedisConfig, RedisPool},
    database::{DatabaseConfig, init_pool, run_migrations},
    logging,
    storage::{S3Config, S3ObjectStore},
};
use generation::{
    GenerationService, GenerationSettings, queue::PgTaskQueue,
    repository::PgGenerationRepository,
};

use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(logging::env_filter())
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting API service");

    let settings = Arc::new(GenerationSettings::load()?);

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    // Check database connectivity
    if common::database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }
    run_migrations(&pool).await?;

    let sessions = RedisPool::new(&RedisConfig::from_env()?).await?;
    let store = Arc::new(S3ObjectStore::from_config(&S3Config::from_env()?).await);

    let repository = Arc::new(PgGenerationRepository::new(pool.clone()));
    let queue = Arc::new(PgTaskQueue::new(pool.clone(), settings.max_attempts));
    let generation = GenerationService::new(repository.clone(), queue, settings.clone());

    let app_state = AppState {
        db_pool: pool,
        sessions,
        generation,
        repository,
        store,
        settings,
    };

    info!("API service initialized successfully");

    // Start the web server
    let app = routes::create_router(app_state);

    let addr = env::var("API_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API service listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
