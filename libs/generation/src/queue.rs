//! Durable task queue for generation tasks
//!
//! [`TaskQueue`] is the producer-side interface used by the request handler.
//! [`PgTaskQueue`] implements it on the `jobs` table and also provides the
//! delivery side used by the worker service: claiming with
//! `FOR UPDATE SKIP LOCKED`, completion and retry bookkeeping.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    error::{GenerationError, GenerationResult},
    models::{GenerationTask, TaskStatus},
};

/// Upper bound for the delay between two attempts
const MAX_BACKOFF_SECS: u64 = 300;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Persist a task for at-least-once delivery and return its id
    async fn enqueue(&self, task: &GenerationTask) -> GenerationResult<String>;

    /// Coarse status of a task; `NotFound` for unknown ids
    async fn status(&self, task_id: &str) -> GenerationResult<TaskStatus>;
}

/// A task handed to one worker
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub id: Uuid,
    /// Deliveries so far, this one included
    pub attempts: i32,
    pub max_attempts: i32,
    pub task: GenerationTask,
}

/// What to do with a task whose attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

/// Exponential backoff: 2, 4, 8, ... seconds, capped
pub fn backoff(attempts: i32) -> Duration {
    let exponent = attempts.clamp(1, 16) as u32;
    Duration::from_secs(2u64.pow(exponent).min(MAX_BACKOFF_SECS))
}

pub fn retry_decision(attempts: i32, max_attempts: i32) -> RetryDecision {
    if attempts >= max_attempts {
        RetryDecision::GiveUp
    } else {
        RetryDecision::Retry {
            delay: backoff(attempts),
        }
    }
}

/// [`TaskQueue`] on the PostgreSQL `jobs` table
#[derive(Clone)]
pub struct PgTaskQueue {
    pool: PgPool,
    max_attempts: i32,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool, max_attempts: i32) -> Self {
        Self { pool, max_attempts }
    }

    /// Atomically claim the next due task
    ///
    /// Queued tasks whose `scheduled_at` has passed are eligible, as are
    /// running tasks whose owner has not finished within `visibility_timeout`
    /// and that still have attempts left. A claimed job whose payload cannot
    /// be read is failed on the spot and the next one is tried.
    pub async fn claim_next(
        &self,
        owner: &str,
        visibility_timeout: Duration,
    ) -> GenerationResult<Option<ClaimedTask>> {
        loop {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query(
                r#"
                WITH candidate AS (
                    SELECT id FROM jobs
                    WHERE (status = 'queued' AND scheduled_at <= NOW())
                       OR (status = 'running'
                           AND started_at < NOW() - INTERVAL '1 second' * $2
                           AND attempts < max_attempts)
                    ORDER BY scheduled_at, created_at
                    FOR UPDATE SKIP LOCKED
                    LIMIT 1
                )
                UPDATE jobs
                SET status = 'running',
                    owner = $1,
                    started_at = NOW(),
                    attempts = attempts + 1,
                    updated_at = NOW()
                WHERE id = (SELECT id FROM candidate)
                RETURNING id, payload, attempts, max_attempts
                "#,
            )
            .bind(owner)
            .bind(visibility_timeout.as_secs_f64())
            .fetch_optional(&mut *tx)
            .await?;

            let Some(row) = row else {
                tx.commit().await?;
                return Ok(None);
            };

            let id: Uuid = row.get("id");
            let payload: Value = row.get("payload");
            let mut task = match serde_json::from_value::<GenerationTask>(payload) {
                Ok(task) => task,
                Err(e) => {
                    let reason = format!("unreadable payload: {}", e);
                    error!("Failing job {}: {}", id, reason);
                    sqlx::query(
                        r#"
                        UPDATE jobs
                        SET status = 'failed', finished_at = NOW(), last_error = $2,
                            updated_at = NOW()
                        WHERE id = $1
                        "#,
                    )
                    .bind(id)
                    .bind(&reason)
                    .execute(&mut *tx)
                    .await?;
                    tx.commit().await?;
                    continue;
                }
            };

            tx.commit().await?;
            task.job_id = Some(id.to_string());

            return Ok(Some(ClaimedTask {
                id,
                attempts: row.get("attempts"),
                max_attempts: row.get("max_attempts"),
                task,
            }));
        }
    }

    pub async fn complete(&self, id: Uuid) -> GenerationResult<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'done', finished_at = NOW(), last_error = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reschedule or fail a task whose attempt returned an error
    pub async fn record_failure(
        &self,
        claimed: &ClaimedTask,
        error: &str,
    ) -> GenerationResult<RetryDecision> {
        let decision = retry_decision(claimed.attempts, claimed.max_attempts);

        match decision {
            RetryDecision::GiveUp => self.give_up(claimed, error).await?,
            RetryDecision::Retry { delay } => {
                warn!(
                    "Rescheduling job {} (attempt {}/{}) in {}s: {}",
                    claimed.id,
                    claimed.attempts,
                    claimed.max_attempts,
                    delay.as_secs(),
                    error
                );
                let scheduled_at = Utc::now() + chrono::Duration::seconds(delay.as_secs() as i64);
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'queued', scheduled_at = $2, owner = NULL, started_at = NULL,
                        last_error = $3, updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(claimed.id)
                .bind(scheduled_at)
                .bind(error)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(decision)
    }

    /// Fail a task without further deliveries
    pub async fn give_up(&self, claimed: &ClaimedTask, error: &str) -> GenerationResult<()> {
        warn!(
            "Job {} failed after {} attempt(s): {}",
            claimed.id, claimed.attempts, error
        );
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', finished_at = NOW(), last_error = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(claimed.id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fail running jobs whose owner vanished after their last attempt
    pub async fn fail_abandoned(&self, visibility_timeout: Duration) -> GenerationResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', finished_at = NOW(),
                last_error = COALESCE(last_error, 'worker abandoned the final attempt'),
                updated_at = NOW()
            WHERE status = 'running'
              AND attempts >= max_attempts
              AND started_at < NOW() - INTERVAL '1 second' * $1
            "#,
        )
        .bind(visibility_timeout.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(&self, task: &GenerationTask) -> GenerationResult<String> {
        let id = Uuid::new_v4();
        let payload = serde_json::to_value(task)
            .map_err(|e| GenerationError::Internal(format!("unserializable task: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, task, payload, max_attempts)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(&task.task)
        .bind(payload)
        .bind(self.max_attempts)
        .execute(&self.pool)
        .await
        .map_err(|e| GenerationError::QueueUnavailable(e.to_string()))?;

        info!(
            "Enqueued {} job {} for generated photo {}",
            task.task, id, task.generated_id
        );
        Ok(id.to_string())
    }

    async fn status(&self, task_id: &str) -> GenerationResult<TaskStatus> {
        let Ok(id) = Uuid::parse_str(task_id) else {
            return Ok(TaskStatus::NotFound);
        };

        let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(status
            .map(|s| TaskStatus::from_job_status(&s))
            .unwrap_or(TaskStatus::NotFound))
    }
}
