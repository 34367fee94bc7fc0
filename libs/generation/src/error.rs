//! Error taxonomy of the generation pipeline

use common::error::{DatabaseError, StorageError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerationError {
    /// No caller identity was resolved
    #[error("Unauthorized")]
    Unauthorized,

    /// A user, photo, theme or file does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// The caller has no credit left
    #[error("Insufficient credits")]
    InsufficientCredits,

    /// Caller supplied input that can never succeed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The task could not be handed to the queue after the debit committed
    #[error("Task queue unavailable: {0}")]
    QueueUnavailable(String),

    /// A delivered task payload is malformed
    #[error("Invalid task payload: {0}")]
    InvalidTask(String),

    /// The image edit API call failed
    #[error("Image edit API failure: {0}")]
    ExternalApi(String),

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    /// A downstream call exceeded its deadline
    #[error("{0} timed out")]
    Timeout(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for GenerationError {
    fn from(err: sqlx::Error) -> Self {
        GenerationError::Database(DatabaseError::Query(err))
    }
}

impl GenerationError {
    /// Whether delivering the same task again could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::Database(_)
                | GenerationError::QueueUnavailable(_)
                | GenerationError::Internal(_)
        )
    }
}

pub type GenerationResult<T> = Result<T, GenerationError>;
