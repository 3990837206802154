use crate::config::StorageConfig;
use crate::object_store::{ObjectStore, ObjectStoreError};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Uploads images to an S3-compatible bucket.
///
/// Works against AWS S3 and S3-compatible endpoints such as the Firebase/GCS
/// interoperability API, MinIO or LocalStack.
pub struct S3Uploader {
    client: S3Client,
    bucket: String,
    config: StorageConfig,
}

impl S3Uploader {
    /// Create a new S3 uploader
    pub async fn new(config: &StorageConfig) -> Result<Self, ObjectStoreError> {
        if config.bucket.trim().is_empty() {
            return Err(ObjectStoreError::Config("bucket is empty".to_string()));
        }
        if config.part_size_bytes < 5 * 1024 * 1024 {
            return Err(ObjectStoreError::Config(
                "part_size_bytes must be at least 5MB".to_string(),
            ));
        }

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for GCS interoperability/MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 uploader initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
        })
    }

    /// Simple single-part upload for small files
    async fn simple_upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Upload(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }

    /// Multipart upload for large files
    async fn multipart_upload(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Upload(DisplayErrorContext(&e).to_string()))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| ObjectStoreError::Upload("No upload ID in response".to_string()))?
            .to_string();

        match self.upload_parts(key, &upload_id, bytes).await {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| ObjectStoreError::Upload(DisplayErrorContext(&e).to_string()))?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        error = %DisplayErrorContext(&abort_err),
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        bytes: &[u8],
    ) -> Result<Vec<CompletedPart>, ObjectStoreError> {
        let mut completed_parts = Vec::new();

        for (index, chunk) in bytes.chunks(self.config.part_size_bytes).enumerate() {
            let part_number = index as i32 + 1;

            let response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| ObjectStoreError::Upload(DisplayErrorContext(&e).to_string()))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        Ok(completed_parts)
    }

    /// Dereferenceable URL for an uploaded key
    async fn object_url(&self, key: &str) -> Result<String, ObjectStoreError> {
        if let Some(ref base) = self.config.public_base_url {
            return Ok(public_url(base, key));
        }

        let presigning_config =
            PresigningConfig::expires_in(Duration::from_secs(self.config.presigned_url_expiry_secs))
                .map_err(|e| ObjectStoreError::Url(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| ObjectStoreError::Url(DisplayErrorContext(&e).to_string()))?;

        Ok(presigned.uri().to_string())
    }
}

#[async_trait]
impl ObjectStore for S3Uploader {
    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len()))]
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        let size_bytes = bytes.len();

        debug!(key = %key, size_bytes, "Uploading image");

        if size_bytes > self.config.multipart_threshold_bytes {
            self.multipart_upload(key, &bytes, content_type).await?;
        } else {
            self.simple_upload(key, bytes, content_type).await?;
        }

        let url = self.object_url(key).await?;

        info!(key = %key, size_bytes, "Image uploaded successfully");

        Ok(url)
    }
}

/// Join a public base URL and an object key
fn public_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_config() -> StorageConfig {
        StorageConfig {
            bucket: "test-bucket".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: Some("http://localhost:9000".to_string()),
            force_path_style: true,
            public_base_url: None,
            presigned_url_expiry_secs: 3600,
            multipart_threshold_bytes: 5 * 1024 * 1024,
            part_size_bytes: 5 * 1024 * 1024,
        }
    }

    #[test]
    fn test_public_url() {
        assert_eq!(
            public_url("https://cdn.example/photos/", "ab12cd34/1000_x.jpg"),
            "https://cdn.example/photos/ab12cd34/1000_x.jpg"
        );
    }

    #[tokio::test]
    async fn test_rejects_empty_bucket() {
        let mut config = storage_config();
        config.bucket = " ".to_string();

        assert!(matches!(
            S3Uploader::new(&config).await,
            Err(ObjectStoreError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_small_part_size() {
        let mut config = storage_config();
        config.part_size_bytes = 1024;

        assert!(matches!(
            S3Uploader::new(&config).await,
            Err(ObjectStoreError::Config(_))
        ));
    }
}
