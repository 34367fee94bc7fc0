use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

mod dispatcher;
mod sweeper;

use common::{
    database::{DatabaseConfig, init_pool, run_migrations},
    id::random_token,
    logging,
    storage::{S3Config, S3ObjectStore},
};
use generation::{
    GenerationSettings, GenerationWorker,
    image_edit::{ImageEditConfig, OpenAiImageClient},
    queue::PgTaskQueue,
    repository::PgGenerationRepository,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(logging::env_filter())
        .init();

    info!("Starting generation worker service");

    let settings = Arc::new(GenerationSettings::load()?);

    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;
    run_migrations(&pool).await?;

    let store = Arc::new(S3ObjectStore::from_config(&S3Config::from_env()?).await);
    let editor = Arc::new(OpenAiImageClient::new(ImageEditConfig::from_env()?));
    let repository = Arc::new(PgGenerationRepository::new(pool.clone()));
    let queue = PgTaskQueue::new(pool, settings.max_attempts);

    let worker = GenerationWorker::new(repository.clone(), store, editor, settings.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let instance = random_token(8);
    let mut handles = Vec::with_capacity(settings.worker_concurrency);
    for n in 0..settings.worker_concurrency {
        handles.push(tokio::spawn(dispatcher::run_worker_loop(
            format!("{}-{}", instance, n),
            queue.clone(),
            worker.clone(),
            settings.clone(),
            shutdown_rx.clone(),
        )));
    }

    let mut scheduler =
        sweeper::start_sweep_scheduler(repository, queue, settings.clone()).await?;

    info!(
        "Generation worker service started with {} workers",
        settings.worker_concurrency
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down generation worker service");

    shutdown_tx.send(true)?;
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Worker loop ended abnormally: {}", e);
        }
    }
    scheduler.shutdown().await?;

    Ok(())
}
