//! Periodic reconciliation of stuck generations and abandoned jobs

use anyhow::Result;
use generation::{
    GenerationSettings, queue::PgTaskQueue, repository::GenerationRepository,
    sweep::reconcile_stuck_generations,
};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

pub async fn start_sweep_scheduler(
    repository: Arc<dyn GenerationRepository>,
    queue: PgTaskQueue,
    settings: Arc<GenerationSettings>,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let schedule = settings.sweep_schedule.clone();

    let job = Job::new_async(schedule.as_str(), move |_, _| {
        let repository = repository.clone();
        let queue = queue.clone();
        let settings = settings.clone();
        Box::pin(async move {
            if let Err(e) = reconcile_stuck_generations(repository.as_ref(), &settings).await {
                error!("Reconciliation sweep failed: {}", e);
            }

            match queue.fail_abandoned(settings.visibility_timeout()).await {
                Ok(0) => {}
                Ok(n) => warn!("Failed {} abandoned job(s)", n),
                Err(e) => error!("Failed to clean up abandoned jobs: {}", e),
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    info!("Started reconciliation sweep with schedule: {}", schedule);
    Ok(scheduler)
}
