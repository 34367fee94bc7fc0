//! Processing of delivered generation tasks
//!
//! [`GenerationWorker::process`] is invoked once per delivery. Deliveries are
//! at-least-once, so a task whose photo is already terminal is acknowledged
//! without doing anything. Once the inputs are resolved, the
//! download → edit → upload → finalize sequence runs on its own tokio task:
//! dropping the delivering future does not abort a nearly complete edit, and
//! every downstream call gets a fresh deadline.

use common::{id::new_id, storage::ObjectStore};
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{Instrument, error, info, info_span, warn};

use crate::{
    config::GenerationSettings,
    error::{GenerationError, GenerationResult},
    image_edit::{EditedImage, ImageEditClient},
    models::{FileRecord, GenerationTask, NewFile},
    repository::GenerationRepository,
};

#[derive(Clone)]
pub struct GenerationWorker {
    repository: Arc<dyn GenerationRepository>,
    store: Arc<dyn ObjectStore>,
    editor: Arc<dyn ImageEditClient>,
    settings: Arc<GenerationSettings>,
}

/// Everything the detached part of an attempt needs
struct Attempt {
    generated_id: String,
    source: FileRecord,
    prompt: String,
    repository: Arc<dyn GenerationRepository>,
    store: Arc<dyn ObjectStore>,
    editor: Arc<dyn ImageEditClient>,
    settings: Arc<GenerationSettings>,
}

async fn with_deadline<T, F>(what: &str, limit: Duration, fut: F) -> GenerationResult<T>
where
    F: Future<Output = GenerationResult<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| GenerationError::Timeout(what.to_string()))?
}

impl GenerationWorker {
    pub fn new(
        repository: Arc<dyn GenerationRepository>,
        store: Arc<dyn ObjectStore>,
        editor: Arc<dyn ImageEditClient>,
        settings: Arc<GenerationSettings>,
    ) -> Self {
        Self {
            repository,
            store,
            editor,
            settings,
        }
    }

    /// Process one delivery of `task`
    pub async fn process(&self, task: GenerationTask) -> GenerationResult<()> {
        let job_id = task.job_id.clone().unwrap_or_default();
        let span = info_span!("generation", job_id = %job_id, generated_id = %task.generated_id);
        self.process_inner(task).instrument(span).await
    }

    async fn process_inner(&self, task: GenerationTask) -> GenerationResult<()> {
        if let Err(e) = task.validate() {
            error!("Rejecting malformed generation task {:?}: {}", task, e);
            return Err(e);
        }

        let generated = self
            .repository
            .find_generated_photo(&task.generated_id)
            .await?
            .ok_or_else(|| {
                GenerationError::NotFound(format!("generated photo {}", task.generated_id))
            })?;

        if generated.status.is_terminal() {
            info!(
                "Generated photo already {}, skipping duplicate delivery",
                generated.status
            );
            return Ok(());
        }

        let source = match self.repository.find_original_photo(&task.original_id).await? {
            Some(original) => match original.file {
                Some(file) => file,
                None => {
                    let subject = format!("file of original photo {}", task.original_id);
                    return Err(self.abort(&task.generated_id, subject).await);
                }
            },
            None => {
                let subject = format!("original photo {}", task.original_id);
                return Err(self.abort(&task.generated_id, subject).await);
            }
        };

        let theme = if task.theme_id.trim().is_empty() {
            None
        } else {
            let theme = self.repository.find_theme(&task.theme_id).await?;
            if theme.is_none() {
                warn!("Theme {} not found, using fallback prompt", task.theme_id);
            }
            theme
        };

        let prompt = theme
            .and_then(|t| t.prompt)
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| self.settings.fallback_prompt.clone());

        let attempt = Attempt {
            generated_id: task.generated_id.clone(),
            source,
            prompt,
            repository: Arc::clone(&self.repository),
            store: Arc::clone(&self.store),
            editor: Arc::clone(&self.editor),
            settings: Arc::clone(&self.settings),
        };

        let span = tracing::Span::current();
        tokio::spawn(attempt.run().instrument(span))
            .await
            .map_err(|e| GenerationError::Internal(format!("generation attempt aborted: {}", e)))?
    }

    /// Fail the row because `subject` is missing and hand back the error to return
    async fn abort(&self, generated_id: &str, subject: String) -> GenerationError {
        let err = GenerationError::NotFound(subject);
        error!("{}", err);
        mark_failed(
            self.repository.as_ref(),
            generated_id,
            &err.to_string(),
            self.settings.refund_on_failure,
        )
        .await;
        err
    }
}

async fn mark_failed(
    repository: &dyn GenerationRepository,
    generated_id: &str,
    message: &str,
    refund: bool,
) {
    match repository.fail_generation(generated_id, message, refund).await {
        Ok(true) => info!("Generated photo marked failed: {}", message),
        Ok(false) => warn!("Generated photo was already terminal, failure not recorded"),
        Err(e) => error!("Could not mark generated photo {} failed: {}", generated_id, e),
    }
}

impl Attempt {
    async fn run(self) -> GenerationResult<()> {
        match self.execute().await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Generation attempt failed: {}", e);
                mark_failed(
                    self.repository.as_ref(),
                    &self.generated_id,
                    &e.to_string(),
                    self.settings.refund_on_failure,
                )
                .await;
                Err(e)
            }
        }
    }

    async fn execute(&self) -> GenerationResult<()> {
        let storage_timeout = self.settings.storage_timeout();

        let original = with_deadline("original download", storage_timeout, async {
            self.store
                .download(&self.source.storage_key)
                .await
                .map_err(GenerationError::from)
        })
        .await?;

        let content_type = self
            .source
            .content_type
            .clone()
            .unwrap_or(original.content_type);

        let edit_timeout = self.settings.edit_timeout();
        let EditedImage {
            bytes,
            content_type: edited_type,
            request_id,
        } = with_deadline(
            "image edit",
            edit_timeout,
            self.editor
                .edit_image(&self.prompt, original.bytes, &content_type, edit_timeout),
        )
        .await?;

        info!(
            "Image edit completed (request id {})",
            request_id.as_deref().unwrap_or("-")
        );

        let file_id = new_id();
        let file = NewFile {
            id: file_id.clone(),
            storage_key: file_id,
            content_type: edited_type,
            size_bytes: bytes.len() as i64,
        };

        with_deadline("generated upload", storage_timeout, async {
            self.store
                .upload(&file.storage_key, bytes, &file.content_type)
                .await
                .map_err(GenerationError::from)
        })
        .await?;

        if self
            .repository
            .finish_generation(&self.generated_id, &file)
            .await?
        {
            info!("Generated photo finished with file {}", file.id);
            return Ok(());
        }

        // Another attempt already decided the outcome; drop our copy.
        warn!(
            "Generated photo was finalized elsewhere, discarding {}",
            file.storage_key
        );
        if let Err(e) = self.store.delete(&file.storage_key).await {
            warn!("Could not delete orphaned object {}: {}", file.storage_key, e);
        }
        Ok(())
    }
}
