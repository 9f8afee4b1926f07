//! Blob storage access.
//!
//! Single responsibility: fetch object bytes by storage key. No retries at
//! this layer; callers decide what a missing artifact or bundle means.

use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use thiserror::Error;

use crate::config::Settings;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to fetch object {key}: {message}")]
    Fetch { key: String, message: String },

    #[error("object {key} is not valid UTF-8")]
    NotUtf8 { key: String },
}

#[derive(Clone)]
pub struct BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl BlobStore {
    pub async fn from_settings(settings: &Settings) -> Self {
        let credentials = Credentials::new(
            settings.aws_access_key_id.clone(),
            settings.aws_secret_access_key.clone(),
            None,
            None,
            "environment",
        );
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.aws_region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;
        Self {
            client: aws_sdk_s3::Client::new(&config),
            bucket: settings.aws_s3_bucket.clone(),
        }
    }

    /// Fetch an object's bytes by storage key.
    pub async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Fetch {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        let body = object
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Fetch {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(body.into_bytes().to_vec())
    }

    /// Fetch an object and decode it as UTF-8 text.
    pub async fn fetch_string(&self, key: &str) -> Result<String, StorageError> {
        let bytes = self.fetch(key).await?;
        String::from_utf8(bytes).map_err(|_| StorageError::NotUtf8 {
            key: key.to_string(),
        })
    }
}
