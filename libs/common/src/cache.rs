//! Redis-backed session store
//!
//! A session is a random token mapped to a user id under `session:<token>`
//! with a TTL. Sessions are created by the sign-in flow and resolved on every
//! authenticated request.

use anyhow::Result;
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

use crate::id::random_token;

/// Length of session tokens handed to clients
const SESSION_TOKEN_LENGTH: usize = 43;

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Lifetime of newly created sessions in seconds
    pub session_ttl_seconds: u64,
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    /// - `SESSION_TTL_SECONDS`: Session lifetime (default: 30 days)
    pub fn from_env() -> Result<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let session_ttl_seconds = std::env::var("SESSION_TTL_SECONDS")
            .unwrap_or_else(|_| "2592000".to_string())
            .parse()
            .unwrap_or(2_592_000);

        Ok(RedisConfig {
            url,
            session_ttl_seconds,
        })
    }
}

/// Redis connection pool
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
    session_ttl_seconds: u64,
}

impl RedisPool {
    /// Initialize a new Redis client
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.clone())?;
        info!("Redis client initialized with URL: {}", config.url);
        Ok(RedisPool {
            client,
            session_ttl_seconds: config.session_ttl_seconds,
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    fn session_key(token: &str) -> String {
        format!("session:{}", token)
    }

    /// Create a session for a user and return its token
    ///
    /// No route here logs users in; this is the seam for an external login
    /// flow and for the integration tests.
    pub async fn start_session(&self, user_id: &str) -> Result<String> {
        let token = random_token(SESSION_TOKEN_LENGTH);
        let mut conn = self.get_connection().await?;
        let _: () = conn
            .set_ex(Self::session_key(&token), user_id, self.session_ttl_seconds)
            .await?;

        info!("Session started for user: {}", user_id);
        Ok(token)
    }

    /// Resolve a session token to the user id it belongs to
    pub async fn session_user(&self, token: &str) -> Result<Option<String>> {
        if token.is_empty() {
            return Ok(None);
        }

        let mut conn = self.get_connection().await?;
        let user_id: Option<String> = conn.get(Self::session_key(token)).await?;
        debug!("Session lookup resolved: {}", user_id.is_some());
        Ok(user_id)
    }

    /// Revoke a session token
    pub async fn end_session(&self, token: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let _: u64 = conn.del(Self::session_key(token)).await?;
        Ok(())
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}
