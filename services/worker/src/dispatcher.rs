//! Claim loop feeding queued tasks to the generation worker

use generation::{
    GenerationResult, GenerationSettings, GenerationWorker,
    queue::{ClaimedTask, PgTaskQueue},
};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{error, info};

/// Claim and process tasks until `shutdown` flips to true
pub async fn run_worker_loop(
    owner: String,
    queue: PgTaskQueue,
    worker: GenerationWorker,
    settings: Arc<GenerationSettings>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Worker {} started", owner);

    while !*shutdown.borrow() {
        match queue.claim_next(&owner, settings.visibility_timeout()).await {
            Ok(Some(claimed)) => handle(&queue, &worker, claimed).await,
            Ok(None) => idle(&mut shutdown, settings.poll_interval()).await,
            Err(e) => {
                error!("Worker {} failed to claim a task: {}", owner, e);
                idle(&mut shutdown, settings.poll_interval()).await;
            }
        }
    }

    info!("Worker {} stopped", owner);
}

async fn handle(queue: &PgTaskQueue, worker: &GenerationWorker, claimed: ClaimedTask) {
    info!(
        "Processing job {} (attempt {}/{})",
        claimed.id, claimed.attempts, claimed.max_attempts
    );

    let result = worker.process(claimed.task.clone()).await;
    let recorded = match (outcome(&result), result.err()) {
        (Outcome::Retry, Some(e)) => queue
            .record_failure(&claimed, &e.to_string())
            .await
            .map(|_| ()),
        (Outcome::GiveUp, Some(e)) => queue.give_up(&claimed, &e.to_string()).await,
        _ => queue.complete(claimed.id).await,
    };

    if let Err(e) = recorded {
        error!("Could not record outcome of job {}: {}", claimed.id, e);
    }
}

/// What the queue records for a processed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Complete,
    Retry,
    GiveUp,
}

fn outcome(result: &GenerationResult<()>) -> Outcome {
    match result {
        Ok(()) => Outcome::Complete,
        Err(e) if e.is_retryable() => Outcome::Retry,
        Err(_) => Outcome::GiveUp,
    }
}

async fn idle(shutdown: &mut watch::Receiver<bool>, wait: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(wait) => {}
        _ = shutdown.changed() => {}
    }
}
