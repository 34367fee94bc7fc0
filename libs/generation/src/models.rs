//! Records and payloads of the generation pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::error::{GenerationError, GenerationResult};

/// Task name carried in every generation payload
pub const GENERATE_TASK: &str = "generate";

/// Reason recorded on the usage row of a debit
pub const DEBIT_REASON: &str = "generate";

/// Reason recorded on the usage row of a refund
pub const REFUND_REASON: &str = "refund";

/// Lifecycle of a generated photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Queued,
    Processing,
    Finished,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Queued => "queued",
            GenerationStatus::Processing => "processing",
            GenerationStatus::Finished => "finished",
            GenerationStatus::Failed => "failed",
        }
    }

    /// Finished and failed rows never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Finished | GenerationStatus::Failed)
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(GenerationStatus::Queued),
            "processing" => Ok(GenerationStatus::Processing),
            "finished" => Ok(GenerationStatus::Finished),
            "failed" => Ok(GenerationStatus::Failed),
            other => Err(format!("unknown generation status: {}", other)),
        }
    }
}

/// User entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub credits: i32,
    pub plan: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub storage_key: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
}

/// An uploaded source image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginalPhoto {
    pub id: String,
    pub album_id: String,
    pub uploaded_by: String,
    pub file: Option<FileRecord>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A named restyling prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Theme {
    pub id: String,
    pub name: String,
    pub prompt: Option<String>,
}

/// Result of restyling one original photo with one theme
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedPhoto {
    pub id: String,
    pub status: GenerationStatus,
    pub original_photo_id: String,
    pub theme_id: Option<String>,
    pub file_id: Option<String>,
    pub requested_by: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Audit row of a credit movement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditUsage {
    pub id: String,
    pub user_id: String,
    pub generated_photo_id: Option<String>,
    /// Positive for debits, negative for refunds
    pub amount: i32,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// File row to create for freshly generated bytes
#[derive(Debug, Clone)]
pub struct NewFile {
    pub id: String,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
}

/// Payload of a generation task as stored in and delivered by the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationTask {
    pub task: String,
    pub original_id: String,
    #[serde(default)]
    pub theme_id: String,
    pub generated_id: String,
    /// Filled in by the queue at delivery time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl GenerationTask {
    pub fn new(original_id: &str, theme_id: &str, generated_id: &str) -> Self {
        Self {
            task: GENERATE_TASK.to_string(),
            original_id: original_id.to_string(),
            theme_id: theme_id.to_string(),
            generated_id: generated_id.to_string(),
            job_id: None,
        }
    }

    /// Reject payloads that can never be processed
    pub fn validate(&self) -> GenerationResult<()> {
        if self.task != GENERATE_TASK {
            return Err(GenerationError::InvalidTask(format!(
                "unexpected task type '{}'",
                self.task
            )));
        }
        if self.generated_id.trim().is_empty() {
            return Err(GenerationError::InvalidTask(
                "generatedId is required".to_string(),
            ));
        }
        if self.original_id.trim().is_empty() {
            return Err(GenerationError::InvalidTask(
                "originalId is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Coarse task status reported to polling clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Unknown,
    NotFound,
}

impl TaskStatus {
    /// Map a raw queue job status onto the client-facing set
    pub fn from_job_status(status: &str) -> Self {
        match status {
            "queued" => TaskStatus::Queued,
            "running" => TaskStatus::Running,
            "done" => TaskStatus::Succeeded,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Unknown,
        }
    }
}

/// What the request handler hands back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationTicket {
    pub task_id: String,
    pub generated_photo_id: String,
}
