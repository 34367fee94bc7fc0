//! Error types shared by the infrastructure adapters
//!
//! `DatabaseError` covers the PostgreSQL pool and migrations, `StorageError`
//! covers the object store.

use sqlx::Error as SqlxError;
use thiserror::Error;

/// Custom error type for database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred during database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Error occurred during database migration
    #[error("Database migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

impl From<SqlxError> for DatabaseError {
    fn from(err: SqlxError) -> Self {
        DatabaseError::Query(err)
    }
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Errors raised by the object store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The requested key does not exist
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object download failed: {0}")]
    Download(String),

    #[error("Object upload failed: {0}")]
    Upload(String),

    #[error("Object delete failed: {0}")]
    Delete(String),

    /// Signed URL could not be produced
    #[error("Presign failed: {0}")]
    Presign(String),

    #[error("Storage configuration error: {0}")]
    Configuration(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
