//! Application state shared across handlers

use common::{cache::RedisPool, storage::ObjectStore};
use generation::{GenerationService, GenerationSettings, repository::GenerationRepository};
use sqlx::PgPool;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub sessions: RedisPool,
    pub generation: GenerationService,
    pub repository: Arc<dyn GenerationRepository>,
    pub store: Arc<dyn ObjectStore>,
    pub settings: Arc<GenerationSettings>,
}
