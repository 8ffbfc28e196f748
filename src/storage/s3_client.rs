//! S3-compatible storage client
//!
//! Thin wrapper over the AWS SDK exposing the handful of object operations
//! the upload storage needs.

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use bytes::Bytes;

use crate::config::S3Config;
use crate::error::{AppError, Result, StorageError};

use super::types::{ObjectMetadata, UploadedPart};

/// Largest page `ListObjectsV2` returns
const LIST_PAGE_SIZE: i32 = 1000;

/// S3-compatible storage client
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket: String,
}

/// Whether an SDK failure means the object (or upload) does not exist
fn is_not_found<E: ProvideErrorMetadata>(e: &SdkError<E>) -> bool {
    if e.raw_response().map(|r| r.status().as_u16()) == Some(404) {
        return true;
    }
    matches!(
        e.as_service_error().and_then(|service| service.code()),
        Some("NoSuchKey" | "NotFound" | "NoSuchUpload")
    )
}

/// Map an SDK failure on `key`, keeping "not found" distinguishable
fn sdk_error<E>(action: &str, key: &str, e: SdkError<E>) -> AppError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    if is_not_found(&e) {
        StorageError::ObjectNotFound(key.to_string()).into()
    } else {
        StorageError::SdkError(format!(
            "Failed to {} {}: {}",
            action,
            key,
            DisplayErrorContext(&e)
        ))
        .into()
    }
}

impl S3Client {
    /// Connect to the configured bucket
    pub async fn new(config: &S3Config) -> Result<Self> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "tusk",
        );
        let region = config.region.as_deref().unwrap_or("us-east-1").to_string();

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // MinIO and R2 need path-style addressing
            .build();

        let client = Client::from_conf(s3_config);
        let bucket = config.bucket.clone();

        if let Err(e) = client.head_bucket().bucket(&bucket).send().await {
            tracing::warn!(
                bucket = %bucket,
                provider = ?config.provider,
                error = %e,
                "Could not verify upload bucket, continuing"
            );
        } else {
            tracing::info!(bucket = %bucket, provider = ?config.provider, "Connected to upload bucket");
        }

        Ok(Self { client, bucket })
    }

    /// Every object under `prefix`, following continuation tokens
    pub async fn list_all_objects(&self, prefix: &str) -> Result<Vec<ObjectMetadata>> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .max_keys(LIST_PAGE_SIZE)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| sdk_error("list", prefix, e))?;

            objects.extend(response.contents().iter().map(|obj| ObjectMetadata {
                key: obj.key().unwrap_or_default().to_string(),
                size: obj.size().unwrap_or(0).max(0) as u64,
                etag: obj.e_tag().map(str::to_string),
            }));

            match response.next_continuation_token() {
                Some(next) if response.is_truncated().unwrap_or(false) => {
                    token = Some(next.to_string());
                }
                _ => break,
            }
        }

        Ok(objects)
    }

    pub async fn object_exists(&self, key: &str) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("head", key, e));

        match result {
            Ok(_) => Ok(true),
            Err(AppError::Storage(StorageError::ObjectNotFound(_))) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read a whole object into memory
    pub async fn get_object(&self, key: &str) -> Result<Bytes> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("get", key, e))?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to read {}: {}", key, e)))?;
        Ok(body.into_bytes())
    }

    /// Store an object in a single request
    pub async fn put_object(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| sdk_error("put", key, e))?;
        Ok(())
    }

    pub async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("delete", key, e))?;
        Ok(())
    }

    /// Delete every object under a prefix, returning how many were removed
    pub async fn delete_objects_with_prefix(&self, prefix: &str) -> Result<usize> {
        let objects = self.list_all_objects(prefix).await?;
        futures::future::try_join_all(objects.iter().map(|object| self.delete_object(&object.key)))
            .await?;
        Ok(objects.len())
    }

    // ========================================================================
    // Multipart Uploads
    // ========================================================================

    /// Start a multipart upload, returning its upload ID
    pub async fn create_multipart_upload(&self, key: &str, content_type: &str) -> Result<String> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| sdk_error("start multipart upload", key, e))?;

        response.upload_id().map(str::to_string).ok_or_else(|| {
            AppError::Storage(StorageError::SdkError(format!(
                "Multipart upload for {} returned no upload ID",
                key
            )))
        })
    }

    pub async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> Result<UploadedPart> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| sdk_error(&format!("upload part {} of", part_number), key, e))?;

        Ok(UploadedPart {
            part_number,
            etag: response.e_tag().unwrap_or_default().to_string(),
        })
    }

    pub async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<()> {
        let parts = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.etag)
                    .build()
            })
            .collect();
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| sdk_error("complete multipart upload", key, e))?;
        Ok(())
    }

    /// Abort a multipart upload, releasing its parts
    pub async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| sdk_error("abort multipart upload", key, e))?;
        Ok(())
    }
}
