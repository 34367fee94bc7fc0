//! Tuning knobs of the generation pipeline
//!
//! Loaded through the `config` crate: built-in defaults overlaid with
//! `GENERATION_*` environment variables, e.g.
//! `GENERATION_REFUND_ON_FAILURE=true`.

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_FALLBACK_PROMPT: &str = "Restyle this photo with a creative, high quality artistic look while keeping the people, composition and scene recognisable.";

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationSettings {
    /// Give the debited credit back when a generation ends in `failed`
    pub refund_on_failure: bool,
    /// Deadline of the external image edit call
    pub edit_timeout_secs: u64,
    /// Deadline of each object store call
    pub storage_timeout_secs: u64,
    /// Queue delivery attempts per task
    pub max_attempts: i32,
    pub worker_concurrency: usize,
    pub poll_interval_ms: u64,
    /// A running job older than this is delivered again
    pub visibility_timeout_secs: u64,
    /// Processing rows older than this are failed by the sweep
    pub stuck_after_secs: u64,
    /// Cron expression (with seconds) of the reconciliation sweep
    pub sweep_schedule: String,
    /// Prompt used when the theme has none
    pub fallback_prompt: String,
    /// Lifetime of signed URLs
    pub presign_ttl_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            refund_on_failure: false,
            edit_timeout_secs: 600,
            storage_timeout_secs: 60,
            max_attempts: 3,
            worker_concurrency: 10,
            poll_interval_ms: 1000,
            visibility_timeout_secs: 900,
            stuck_after_secs: 1800,
            sweep_schedule: "0 */5 * * * *".to_string(),
            fallback_prompt: DEFAULT_FALLBACK_PROMPT.to_string(),
            presign_ttl_secs: 900,
        }
    }
}

impl GenerationSettings {
    /// Load settings from defaults and `GENERATION_*` environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let settings: Self = Config::builder()
            .set_default("refund_on_failure", defaults.refund_on_failure)?
            .set_default("edit_timeout_secs", defaults.edit_timeout_secs)?
            .set_default("storage_timeout_secs", defaults.storage_timeout_secs)?
            .set_default("max_attempts", defaults.max_attempts)?
            .set_default("worker_concurrency", defaults.worker_concurrency as u64)?
            .set_default("poll_interval_ms", defaults.poll_interval_ms)?
            .set_default("visibility_timeout_secs", defaults.visibility_timeout_secs)?
            .set_default("stuck_after_secs", defaults.stuck_after_secs)?
            .set_default("sweep_schedule", defaults.sweep_schedule)?
            .set_default("fallback_prompt", defaults.fallback_prompt)?
            .set_default("presign_ttl_secs", defaults.presign_ttl_secs)?
            .add_source(Environment::with_prefix("GENERATION").try_parsing(true))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject combinations under which the sweep would fail live attempts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < 1 {
            return Err(ConfigError::Message(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.worker_concurrency == 0 {
            return Err(ConfigError::Message(
                "worker_concurrency must be at least 1".to_string(),
            ));
        }

        let longest_attempt = self.edit_timeout_secs + 2 * self.storage_timeout_secs;
        if self.stuck_after_secs <= longest_attempt {
            return Err(ConfigError::Message(format!(
                "stuck_after_secs ({}) must exceed the longest attempt ({}s)",
                self.stuck_after_secs, longest_attempt
            )));
        }

        Ok(())
    }

    pub fn edit_timeout(&self) -> Duration {
        Duration::from_secs(self.edit_timeout_secs)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn stuck_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stuck_after_secs as i64)
    }

    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.presign_ttl_secs)
    }
}
