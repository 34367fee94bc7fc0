//! Client for the external image edit API
//!
//! The API takes a multipart form (model, quality, size, fidelity, prompt and
//! the source image) and answers with a base64 encoded image.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{
    Client,
    multipart::{Form, Part},
};
use serde::Deserialize;
use std::{env, time::Duration};
use tracing::info;

use crate::error::{GenerationError, GenerationResult};

/// Header carrying the provider's request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Content type of images returned by the API
pub const EDITED_CONTENT_TYPE: &str = "image/png";

/// Output of one edit call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// Provider request id, for correlating logs with the provider
    pub request_id: Option<String>,
}

#[async_trait]
pub trait ImageEditClient: Send + Sync {
    /// Restyle `image` according to `prompt` within `timeout`
    async fn edit_image(
        &self,
        prompt: &str,
        image: Vec<u8>,
        content_type: &str,
        timeout: Duration,
    ) -> GenerationResult<EditedImage>;
}

/// Image edit API configuration
#[derive(Debug, Clone)]
pub struct ImageEditConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub quality: String,
    pub size: String,
    pub fidelity: String,
}

impl ImageEditConfig {
    /// Create a new ImageEditConfig from environment variables
    ///
    /// # Environment Variables
    /// - `OPENAI_API_KEY`: API key (required)
    /// - `IMAGE_EDIT_BASE_URL`: API base URL (default: "https://api.openai.com/v1")
    /// - `IMAGE_EDIT_MODEL`: model (default: "gpt-image-1")
    /// - `IMAGE_EDIT_QUALITY`: quality (default: "high")
    /// - `IMAGE_EDIT_SIZE`: output size (default: "auto")
    /// - `IMAGE_EDIT_FIDELITY`: input fidelity (default: "high")
    pub fn from_env() -> GenerationResult<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                GenerationError::InvalidRequest(
                    "OPENAI_API_KEY environment variable not set".to_string(),
                )
            })?;

        let var =
            |name: &str, default: &str| env::var(name).unwrap_or_else(|_| default.to_string());

        Ok(Self {
            api_key,
            base_url: var("IMAGE_EDIT_BASE_URL", "https://api.openai.com/v1"),
            model: var("IMAGE_EDIT_MODEL", "gpt-image-1"),
            quality: var("IMAGE_EDIT_QUALITY", "high"),
            size: var("IMAGE_EDIT_SIZE", "auto"),
            fidelity: var("IMAGE_EDIT_FIDELITY", "high"),
        })
    }

    fn edits_url(&self) -> String {
        format!("{}/images/edits", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct EditResponse {
    data: Vec<EditData>,
}

#[derive(Debug, Deserialize)]
struct EditData {
    b64_json: Option<String>,
}

/// Extract the image bytes from an edit response body
fn decode_edit_response(body: &str) -> GenerationResult<Vec<u8>> {
    let response: EditResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::ExternalApi(format!("unreadable response: {}", e)))?;

    let encoded = response
        .data
        .into_iter()
        .find_map(|d| d.b64_json)
        .ok_or_else(|| GenerationError::ExternalApi("response contained no image".to_string()))?;

    STANDARD
        .decode(encoded.trim())
        .map_err(|e| GenerationError::ExternalApi(format!("invalid base64 image: {}", e)))
}

fn file_name_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" | "image/jpg" => "image.jpg",
        "image/webp" => "image.webp",
        _ => "image.png",
    }
}

/// [`ImageEditClient`] for the OpenAI images API
#[derive(Clone)]
pub struct OpenAiImageClient {
    http: Client,
    config: ImageEditConfig,
}

impl OpenAiImageClient {
    pub fn new(config: ImageEditConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ImageEditClient for OpenAiImageClient {
    async fn edit_image(
        &self,
        prompt: &str,
        image: Vec<u8>,
        content_type: &str,
        timeout: Duration,
    ) -> GenerationResult<EditedImage> {
        let part = Part::bytes(image)
            .file_name(file_name_for(content_type))
            .mime_str(content_type)
            .map_err(|e| GenerationError::ExternalApi(format!("invalid content type: {}", e)))?;

        let form = Form::new()
            .text("model", self.config.model.clone())
            .text("quality", self.config.quality.clone())
            .text("size", self.config.size.clone())
            .text("input_fidelity", self.config.fidelity.clone())
            .text("prompt", prompt.to_string())
            .part("image", part);

        let response = self
            .http
            .post(self.config.edits_url())
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout("image edit request".to_string())
                } else {
                    GenerationError::ExternalApi(e.to_string())
                }
            })?;

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GenerationError::ExternalApi(format!("reading response: {}", e)))?;

        if !status.is_success() {
            return Err(GenerationError::ExternalApi(format!(
                "status {} (request id {}): {}",
                status,
                request_id.as_deref().unwrap_or("-"),
                body
            )));
        }

        let bytes = decode_edit_response(&body)?;
        info!(
            "Image edit returned {} bytes (request id {})",
            bytes.len(),
            request_id.as_deref().unwrap_or("-")
        );

        Ok(EditedImage {
            bytes,
            content_type: EDITED_CONTENT_TYPE.to_string(),
            request_id,
        })
    }
}
