//! Object store for photo bytes
//!
//! [`ObjectStore`] is the narrow interface the generation pipeline and the
//! API use; [`S3ObjectStore`] implements it on any S3-compatible bucket.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client, error::DisplayErrorContext, presigning::PresigningConfig, primitives::ByteStream,
};
use std::{env, time::Duration};
use tracing::info;

use crate::error::{StorageError, StorageResult};

/// Content type assumed when the store has none recorded
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Bytes of a stored object together with their content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Key-value blob storage with signed URL support
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the object stored under `key`
    async fn download(&self, key: &str) -> StorageResult<StoredObject>;

    /// Store `bytes` under `key`, replacing any previous object
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Remove the object under `key`
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Signed URL allowing a client to PUT an object directly
    async fn presign_put(&self, key: &str, content_type: &str, ttl: Duration)
    -> StorageResult<String>;

    /// Signed URL allowing a client to GET an object directly
    async fn presign_get(&self, key: &str, ttl: Duration) -> StorageResult<String>;
}

/// S3 bucket configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Bucket holding originals and generated photos
    pub bucket: String,
    /// Custom endpoint for S3-compatible stores (MinIO, R2, ...)
    pub endpoint: Option<String>,
}

impl S3Config {
    /// Create a new S3Config from environment variables
    ///
    /// # Environment Variables
    /// - `MEDIA_BUCKET_NAME`: bucket name (default: "photos")
    /// - `S3_ENDPOINT`: optional custom endpoint, enables path-style addressing
    pub fn from_env() -> StorageResult<Self> {
        let bucket = env::var("MEDIA_BUCKET_NAME").unwrap_or_else(|_| "photos".to_string());
        if bucket.trim().is_empty() {
            return Err(StorageError::Configuration(
                "MEDIA_BUCKET_NAME must not be empty".to_string(),
            ));
        }

        let endpoint = env::var("S3_ENDPOINT").ok().filter(|e| !e.trim().is_empty());

        Ok(Self { bucket, endpoint })
    }
}

/// [`ObjectStore`] backed by an S3 bucket
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Build a client from the ambient AWS configuration
    pub async fn from_config(config: &S3Config) -> Self {
        let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;

        let client = match &config.endpoint {
            Some(endpoint) => {
                info!("Using custom S3 endpoint: {}", endpoint);
                let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
                    .endpoint_url(endpoint)
                    .force_path_style(true)
                    .build();
                Client::from_conf(s3_config)
            }
            None => Client::new(&sdk_config),
        };

        Self::new(client, config.bucket.clone())
    }

    fn presigning(ttl: Duration) -> StorageResult<PresigningConfig> {
        PresigningConfig::expires_in(ttl)
            .map_err(|e| StorageError::Presign(format!("invalid expiry {:?}: {}", ttl, e)))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn download(&self, key: &str) -> StorageResult<StoredObject> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Download(format!("{}: {}", key, DisplayErrorContext(&e)))
                }
            })?;

        let content_type = output
            .content_type()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Download(format!("{}: {}", key, e)))?
            .into_bytes()
            .to_vec();

        Ok(StoredObject {
            bytes,
            content_type,
        })
    }

    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> StorageResult<()> {
        info!("Uploading {} bytes to {}/{}", bytes.len(), self.bucket, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload(format!("{}: {}", key, DisplayErrorContext(&e))))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Delete(format!("{}: {}", key, DisplayErrorContext(&e))))?;

        Ok(())
    }

    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> StorageResult<String> {
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(Self::presigning(ttl)?)
            .await
            .map_err(|e| StorageError::Presign(format!("{}: {}", key, DisplayErrorContext(&e))))?;

        Ok(request.uri().to_string())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(Self::presigning(ttl)?)
            .await
            .map_err(|e| StorageError::Presign(format!("{}: {}", key, DisplayErrorContext(&e))))?;

        Ok(request.uri().to_string())
    }
}
