//! API models for request and response payloads

use chrono::{DateTime, Utc};
use generation::models::{GeneratedPhoto, GenerationStatus, TaskStatus, User};
use serde::{Deserialize, Serialize};

/// Body of `POST /photos/:original_id/generate`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub theme_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedPhotoResponse {
    pub id: String,
    pub status: GenerationStatus,
    pub original_photo_id: String,
    pub theme_id: Option<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Signed download URL, present once finished
    pub url: Option<String>,
}

impl GeneratedPhotoResponse {
    pub fn new(photo: GeneratedPhoto, url: Option<String>) -> Self {
        Self {
            id: photo.id,
            status: photo.status,
            original_photo_id: photo.original_photo_id,
            theme_id: photo.theme_id,
            error_message: photo.error_message,
            started_at: photo.started_at,
            finished_at: photo.finished_at,
            url,
        }
    }
}

/// Body of `POST /uploads`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub content_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub key: String,
    pub upload_url: String,
    /// Seconds until `upload_url` stops working
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: String,
    pub email: String,
    pub credits: i32,
    pub plan: String,
}

impl From<User> for MeResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            credits: user.credits,
            plan: user.plan,
        }
    }
}
