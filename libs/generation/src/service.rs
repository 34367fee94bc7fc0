//! Generation request handling
//!
//! Debits a credit and creates the `processing` row in one transaction, then
//! hands the work to the task queue. A failed enqueue cannot roll the
//! committed debit back, so it is compensated by failing the row.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    config::GenerationSettings,
    error::{GenerationError, GenerationResult},
    models::{GenerationTask, GenerationTicket, TaskStatus},
    queue::TaskQueue,
    repository::GenerationRepository,
};

#[derive(Clone)]
pub struct GenerationService {
    repository: Arc<dyn GenerationRepository>,
    queue: Arc<dyn TaskQueue>,
    settings: Arc<GenerationSettings>,
}

impl GenerationService {
    pub fn new(
        repository: Arc<dyn GenerationRepository>,
        queue: Arc<dyn TaskQueue>,
        settings: Arc<GenerationSettings>,
    ) -> Self {
        Self {
            repository,
            queue,
            settings,
        }
    }

    /// Request a restyle of `original_photo_id` with `theme_id` on behalf of `caller_id`
    pub async fn generate(
        &self,
        caller_id: &str,
        original_photo_id: &str,
        theme_id: &str,
    ) -> GenerationResult<GenerationTicket> {
        if caller_id.trim().is_empty() {
            return Err(GenerationError::Unauthorized);
        }
        if theme_id.trim().is_empty() {
            return Err(GenerationError::InvalidRequest(
                "themeId is required".to_string(),
            ));
        }
        if original_photo_id.trim().is_empty() {
            return Err(GenerationError::InvalidRequest(
                "original photo id is required".to_string(),
            ));
        }

        let generated = self
            .repository
            .start_generation(caller_id, original_photo_id, theme_id)
            .await?;

        info!(
            "Generated photo {} created for original {} with theme {}",
            generated.id, original_photo_id, theme_id
        );

        let task = GenerationTask::new(original_photo_id, theme_id, &generated.id);
        match self.queue.enqueue(&task).await {
            Ok(task_id) => {
                info!("Generation task {} queued for {}", task_id, generated.id);
                Ok(GenerationTicket {
                    task_id,
                    generated_photo_id: generated.id,
                })
            }
            Err(e) => {
                error!("Failed to enqueue generation {}: {}", generated.id, e);
                let message = format!("failed to enqueue generation task: {}", e);

                match self
                    .repository
                    .fail_generation(&generated.id, &message, self.settings.refund_on_failure)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => warn!(
                        "Generated photo {} was already terminal during enqueue compensation",
                        generated.id
                    ),
                    Err(mark_err) => error!(
                        "Could not mark generated photo {} as failed: {}",
                        generated.id, mark_err
                    ),
                }

                Err(match e {
                    GenerationError::QueueUnavailable(_) => e,
                    other => GenerationError::QueueUnavailable(other.to_string()),
                })
            }
        }
    }

    /// Status of a previously enqueued task
    pub async fn task_status(&self, task_id: &str) -> GenerationResult<TaskStatus> {
        if task_id.trim().is_empty() {
            return Ok(TaskStatus::NotFound);
        }
        self.queue.status(task_id).await
    }
}
