//! Common library for the photo album backend
//!
//! This crate provides the infrastructure shared by the API and worker
//! services: PostgreSQL pooling and migrations, the Redis session store,
//! the S3 object store, id generation, log filtering and error types.

pub mod cache;
pub mod database;
pub mod error;
pub mod id;
pub mod logging;
pub mod storage;

/// Example usage of the database module
///
/// ```rust,no_run
/// use common::database::{DatabaseConfig, init_pool, health_check, run_migrations};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DatabaseConfig::from_env()?;
///     let pool = init_pool(&config).await?;
///     run_migrations(&pool).await?;
///     println!("Database health check: {}", health_check(&pool).await?);
///     Ok(())
/// }
/// ```
pub fn example_usage() {}
