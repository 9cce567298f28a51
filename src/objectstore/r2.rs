//! S3-compatible client for Cloudflare R2.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::config::{BehaviorVersion, Credentials};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::{retain_since, upload_metadata, ObjectMetadata, ObjectStore, ObjectSummary};
use crate::config::{ConfigError, R2Settings};
use crate::error::ObjectStoreError;

/// R2 bucket client.
pub struct R2Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl R2Store {
    /// Builds a client from complete R2 settings.
    pub fn new(settings: &R2Settings) -> Result<Self, ConfigError> {
        let (Some(endpoint), Some(key_id), Some(secret)) = (
            settings.endpoint_url.as_deref(),
            settings.access_key_id.as_deref(),
            settings.secret_access_key.as_deref(),
        ) else {
            return Err(ConfigError::ValidationFailed(
                "R2 configuration is incomplete. Please check environment variables.".to_string(),
            ));
        };

        let credentials = Credentials::new(key_id, secret, None, None, "subreddit-harvest");

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(endpoint)
            .region(Region::new("auto"))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(config),
            bucket: settings.bucket.clone(),
        })
    }
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[async_trait]
impl ObjectStore for R2Store {
    async fn upload_file(
        &self,
        path: &Path,
        key: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), ObjectStoreError> {
        if !path.is_file() {
            return Err(ObjectStoreError::FileMissing(path.to_path_buf()));
        }
        let metadata = upload_metadata(metadata, Utc::now());
        info!(
            file = %path.display(),
            bucket = %self.bucket,
            key = %key,
            "Uploading to R2"
        );

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| ObjectStoreError::UploadFailed {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type("application/zip")
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .map_err(|e| ObjectStoreError::UploadFailed {
                key: key.to_string(),
                message: DisplayErrorContext(e).to_string(),
            })?;

        info!(key = %key, ?metadata, "Uploaded to R2");
        Ok(())
    }

    async fn list_objects(
        &self,
        prefix: &str,
        days_back: i64,
    ) -> Result<Vec<ObjectSummary>, ObjectStoreError> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| ObjectStoreError::ListFailed(DisplayErrorContext(e).to_string()))?;

            for obj in resp.contents() {
                let (Some(key), Some(modified)) =
                    (obj.key(), obj.last_modified().and_then(to_chrono))
                else {
                    continue;
                };
                let size = obj.size().unwrap_or(0).max(0) as u64;
                objects.push(ObjectSummary::new(key, size, modified));
            }

            match resp.next_continuation_token() {
                Some(next) if resp.is_truncated().unwrap_or(false) => {
                    token = Some(next.to_string())
                }
                _ => break,
            }
        }

        debug!(prefix = %prefix, count = objects.len(), "Listed R2 objects");
        Ok(retain_since(objects, Utc::now() - Duration::days(days_back)))
    }

    async fn object_metadata(&self, key: &str) -> Result<ObjectMetadata, ObjectStoreError> {
        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ObjectStoreError::HeadFailed {
                key: key.to_string(),
                message: DisplayErrorContext(e).to_string(),
            })?;

        Ok(ObjectMetadata {
            content_length: resp.content_length().unwrap_or(0).max(0) as u64,
            last_modified: resp.last_modified().and_then(to_chrono),
            metadata: resp.metadata().cloned().unwrap_or_default(),
            content_type: resp.content_type().unwrap_or("unknown").to_string(),
        })
    }

    async fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ObjectStoreError::DeleteFailed {
                key: key.to_string(),
                message: DisplayErrorContext(e).to_string(),
            })?;
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_credentials() {
        let settings = R2Settings {
            endpoint_url: Some("https://acct.r2.cloudflarestorage.com".to_string()),
            access_key_id: None,
            secret_access_key: Some("secret".to_string()),
            bucket: "bucket".to_string(),
        };
        assert!(R2Store::new(&settings).is_err());
    }

    #[test]
    fn test_new_with_complete_settings() {
        let settings = R2Settings {
            endpoint_url: Some("https://acct.r2.cloudflarestorage.com".to_string()),
            access_key_id: Some("key".to_string()),
            secret_access_key: Some("secret".to_string()),
            bucket: "creditcardsindia".to_string(),
        };
        let store = R2Store::new(&settings).unwrap();
        assert_eq!(store.bucket(), "creditcardsindia");
    }
}
