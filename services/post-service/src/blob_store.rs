use crate::config::S3Config;
use crate::error::PostError;
use crate::model::ImageUpload;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

/// Gateway to the object store holding post images
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `image` under `key` in `bucket`, make it world-readable and
    /// return the URL clients can fetch it from
    async fn store(&self, bucket: &str, key: &str, image: &ImageUpload)
        -> Result<String, PostError>;
}

/// S3-backed blob store
pub struct S3BlobStore {
    client: S3Client,
    config: S3Config,
}

impl S3BlobStore {
    /// Create a new S3 blob store
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
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
            "S3 blob store initialized"
        );

        Self {
            client,
            config: config.clone(),
        }
    }

    /// Fail early when the bucket cannot be addressed
    async fn check_bucket(&self, bucket: &str) -> Result<(), PostError> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| {
                PostError::BlobUnavailable(format!("bucket {} is not reachable: {}", bucket, e))
            })?;
        Ok(())
    }

    /// Simple single-part upload for small images
    async fn simple_upload(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), PostError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .map_err(|e| PostError::BlobUnavailable(format!("failed to upload {}: {}", key, e)))?;

        Ok(())
    }

    /// Multipart upload for large images
    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), PostError> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .map_err(|e| {
                PostError::BlobUnavailable(format!("failed to create multipart upload: {}", e))
            })?;

        let upload_id = create_response.upload_id().ok_or_else(|| {
            PostError::BlobUnavailable("no upload ID in multipart response".to_string())
        })?;

        // An unfinished upload keeps its parts stored until aborted
        if let Err(e) = self.upload_parts(bucket, key, upload_id, &body).await {
            self.abort_upload(bucket, key, upload_id).await;
            return Err(e);
        }

        Ok(())
    }

    /// Upload every part of `body` and complete the upload
    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        body: &Bytes,
    ) -> Result<(), PostError> {
        let mut completed_parts = Vec::new();

        for (index, chunk) in body.chunks(self.config.part_size_bytes.max(1)).enumerate() {
            let part_number = index as i32 + 1;

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(body.slice_ref(chunk)))
                .send()
                .await
                .map_err(|e| {
                    PostError::BlobUnavailable(format!("failed to upload part {}: {}", part_number, e))
                })?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| {
                PostError::BlobUnavailable(format!("failed to complete multipart upload: {}", e))
            })?;

        Ok(())
    }

    async fn abort_upload(&self, bucket: &str, key: &str, upload_id: &str) {
        match self
            .client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            Ok(_) => debug!(key = %key, upload_id = %upload_id, "Aborted multipart upload"),
            Err(e) => warn!(
                key = %key,
                upload_id = %upload_id,
                error = %e,
                "Failed to abort multipart upload"
            ),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self, image), fields(size_bytes = image.bytes.len()))]
    async fn store(
        &self,
        bucket: &str,
        key: &str,
        image: &ImageUpload,
    ) -> Result<String, PostError> {
        self.check_bucket(bucket).await?;

        let content_type = content_type_for(image);

        debug!(key = %key, content_type = %content_type, "Uploading image to S3");

        if image.bytes.len() > self.config.multipart_threshold_bytes {
            self.multipart_upload(bucket, key, image.bytes.clone(), &content_type)
                .await?;
        } else {
            self.simple_upload(bucket, key, image.bytes.clone(), &content_type)
                .await?;
        }

        let url = public_url(&self.config, bucket, key);

        info!(key = %key, url = %url, "Image saved to S3");

        Ok(url)
    }
}

/// Resolve the URL an uploaded object is served from
fn public_url(config: &S3Config, bucket: &str, key: &str) -> String {
    if let Some(ref base) = config.public_base_url {
        return format!("{}/{}", base.trim_end_matches('/'), key);
    }

    match config.endpoint_url {
        Some(ref endpoint) if config.force_path_style => {
            format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key)
        }
        _ => format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            bucket, config.region, key
        ),
    }
}

/// Content type of the uploaded part, falling back to the file extension
fn content_type_for(image: &ImageUpload) -> String {
    if let Some(ref content_type) = image.content_type {
        if !content_type.is_empty() {
            return content_type.clone();
        }
    }

    let extension = image
        .file_name
        .as_deref()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpeg" | "jpg" => "image/jpeg".to_string(),
        "png" => "image/png".to_string(),
        "webp" => "image/webp".to_string(),
        "bmp" => "image/bmp".to_string(),
        "gif" => "image/gif".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}
