//! Recovery of generations that never reached a terminal state
//!
//! A worker that crashes mid-attempt leaves its photo `processing`. The sweep
//! fails such rows once they are older than the longest possible attempt.

use chrono::Utc;
use tracing::{info, warn};

use crate::{
    config::GenerationSettings, error::GenerationResult, repository::GenerationRepository,
};

/// Message stored on rows failed by the sweep
pub const STUCK_MESSAGE: &str = "generation timed out";

/// Fail stale `processing` rows and return their ids
pub async fn reconcile_stuck_generations(
    repository: &dyn GenerationRepository,
    settings: &GenerationSettings,
) -> GenerationResult<Vec<String>> {
    let cutoff = Utc::now() - settings.stuck_after();

    let failed = repository
        .fail_stale_generations(cutoff, STUCK_MESSAGE, settings.refund_on_failure)
        .await?;

    if failed.is_empty() {
        info!("Reconciliation sweep found no stuck generations");
    } else {
        warn!(
            "Reconciliation sweep failed {} stuck generation(s): {:?}",
            failed.len(),
            failed
        );
    }

    Ok(failed)
}
