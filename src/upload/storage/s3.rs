//! S3 upload storage
//!
//! Every accepted chunk is one object under
//! `{prefix}/partials/{session}/{offset}.part`. A single PUT either lands or
//! doesn't, so a failed chunk never leaves partial credit behind. Finalize
//! streams the parts, in offset order, into the final object.

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{collision_name, storage_error, UploadStorage};
use crate::storage::{ObjectMetadata, S3Client, UploadedPart};
use crate::upload::types::{StorageObject, UploadError};

/// Smallest multipart part we send (S3 requires at least 5MB except the last)
const MIN_PART_SIZE: u64 = 8 * 1024 * 1024;

/// S3 caps a multipart upload at this many parts
const MAX_PARTS: u64 = 10_000;

/// Part size that keeps an object of `total` bytes within `MAX_PARTS`
fn part_size(total: u64) -> usize {
    let size = MIN_PART_SIZE.max(total.div_ceil(MAX_PARTS));
    usize::try_from(size).unwrap_or(usize::MAX)
}

const PART_SUFFIX: &str = ".part";

/// S3-based upload storage
pub struct S3UploadStorage {
    client: S3Client,
    prefix: String,
}

impl S3UploadStorage {
    pub fn new(client: S3Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    fn partials_prefix(&self, session_id: Uuid) -> String {
        format!("{}/partials/{}/", self.prefix, session_id)
    }

    fn part_key(&self, session_id: Uuid, offset: u64) -> String {
        format!("{}{:020}{}", self.partials_prefix(session_id), offset, PART_SUFFIX)
    }

    fn object_key(&self, name: &str) -> String {
        format!("{}/objects/{}", self.prefix, name)
    }

    /// Parts of a session, ordered by offset
    async fn parts(&self, session_id: Uuid) -> Result<Vec<ObjectMetadata>, UploadError> {
        let mut parts = self
            .client
            .list_all_objects(&self.partials_prefix(session_id))
            .await
            .map_err(|e| storage_error("Failed to list parts", e))?;
        parts.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(parts)
    }

    /// Upload the parts as one object, returning (size, sha256)
    async fn assemble(
        &self,
        parts: &[ObjectMetadata],
        key: &str,
        content_type: &str,
    ) -> Result<(u64, String), UploadError> {
        let total: u64 = parts.iter().map(|part| part.size).sum();
        let mut hasher = Sha256::new();

        let part_size = part_size(total);
        if total <= part_size as u64 {
            let mut data = Vec::with_capacity(total as usize);
            for part in parts {
                let object = self
                    .client
                    .get_object(&part.key)
                    .await
                    .map_err(|e| storage_error("Failed to read part", e))?;
                hasher.update(&object);
                data.extend_from_slice(&object);
            }
            self.client
                .put_object(key, data, content_type)
                .await
                .map_err(|e| storage_error("Failed to store object", e))?;
            return Ok((total, hex::encode(hasher.finalize())));
        }

        let upload_id = self
            .client
            .create_multipart_upload(key, content_type)
            .await
            .map_err(|e| storage_error("Failed to start object upload", e))?;

        let result = self
            .upload_parts(parts, key, &upload_id, part_size, &mut hasher)
            .await;

        match result {
            Ok(uploaded) => {
                self.client
                    .complete_multipart_upload(key, &upload_id, &uploaded)
                    .await
                    .map_err(|e| storage_error("Failed to complete object upload", e))?;
                Ok((total, hex::encode(hasher.finalize())))
            }
            Err(e) => {
                if let Err(abort_err) = self.client.abort_multipart_upload(key, &upload_id).await {
                    tracing::warn!(key = %key, error = %abort_err, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        parts: &[ObjectMetadata],
        key: &str,
        upload_id: &str,
        part_size: usize,
        hasher: &mut Sha256,
    ) -> Result<Vec<UploadedPart>, UploadError> {
        let mut uploaded = Vec::new();
        let mut buffer: Vec<u8> = Vec::with_capacity(part_size);

        for part in parts {
            let object = self
                .client
                .get_object(&part.key)
                .await
                .map_err(|e| storage_error("Failed to read part", e))?;
            hasher.update(&object);
            buffer.extend_from_slice(&object);

            while buffer.len() >= part_size {
                let rest = buffer.split_off(part_size);
                let body = std::mem::replace(&mut buffer, rest);
                let number = uploaded.len() as i32 + 1;
                uploaded.push(
                    self.client
                        .upload_part(key, upload_id, number, body)
                        .await
                        .map_err(|e| storage_error("Failed to upload part", e))?,
                );
            }
        }

        if !buffer.is_empty() {
            let number = uploaded.len() as i32 + 1;
            uploaded.push(
                self.client
                    .upload_part(key, upload_id, number, buffer)
                    .await
                    .map_err(|e| storage_error("Failed to upload part", e))?,
            );
        }

        Ok(uploaded)
    }
}

/// Offset encoded in a part key
fn part_offset(key: &str) -> Option<u64> {
    key.rsplit('/')
        .next()?
        .strip_suffix(PART_SUFFIX)?
        .parse()
        .ok()
}

/// Check that parts tile `[0, total)` with no gap or overlap
fn check_contiguous(parts: &[ObjectMetadata]) -> Result<u64, UploadError> {
    let mut expected = 0u64;
    for part in parts {
        let offset = part_offset(&part.key).ok_or_else(|| {
            UploadError::StorageBackendError(format!("Unexpected part key: {}", part.key))
        })?;
        if offset != expected {
            return Err(UploadError::StorageBackendError(format!(
                "Part {} does not start at offset {}",
                part.key, expected
            )));
        }
        expected += part.size;
    }
    Ok(expected)
}

#[async_trait::async_trait]
impl UploadStorage for S3UploadStorage {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    async fn create(&self, _session_id: Uuid) -> Result<(), UploadError> {
        // Parts are created lazily
        Ok(())
    }

    async fn write_chunk(
        &self,
        session_id: Uuid,
        offset: u64,
        data: &[u8],
    ) -> Result<u64, UploadError> {
        let stored = self.read_offset(session_id).await?;
        if stored != offset {
            return Err(UploadError::OffsetMismatch {
                expected: stored,
                actual: offset,
            });
        }

        if data.is_empty() {
            return Ok(offset);
        }

        self.client
            .put_object(
                &self.part_key(session_id, offset),
                data.to_vec(),
                "application/octet-stream",
            )
            .await
            .map_err(|e| storage_error("Failed to store chunk", e))?;

        Ok(offset + data.len() as u64)
    }

    async fn read_offset(&self, session_id: Uuid) -> Result<u64, UploadError> {
        let parts = self.parts(session_id).await?;
        Ok(parts.iter().map(|part| part.size).sum())
    }

    async fn finalize(
        &self,
        session_id: Uuid,
        name: &str,
        content_type: Option<&str>,
    ) -> Result<StorageObject, UploadError> {
        let parts = self.parts(session_id).await?;
        check_contiguous(&parts)?;

        let mut final_name = name.to_string();
        let taken = self
            .client
            .object_exists(&self.object_key(&final_name))
            .await
            .map_err(|e| storage_error("Failed to check object name", e))?;
        if taken {
            final_name = collision_name(name, session_id);
        }
        let key = self.object_key(&final_name);

        let (size, sha256) = self
            .assemble(
                &parts,
                &key,
                content_type.unwrap_or("application/octet-stream"),
            )
            .await?;

        tracing::debug!(
            session_id = %session_id,
            key = %key,
            parts = parts.len(),
            size = size,
            "Assembled upload from parts"
        );

        if let Err(e) = self.discard(session_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to delete parts after finalize");
        }

        Ok(StorageObject {
            key,
            name: final_name,
            size,
            sha256,
            content_type: content_type.map(str::to_string),
            created_at: Utc::now(),
        })
    }

    async fn discard(&self, session_id: Uuid) -> Result<(), UploadError> {
        let removed = self
            .client
            .delete_objects_with_prefix(&self.partials_prefix(session_id))
            .await
            .map_err(|e| storage_error("Failed to delete parts", e))?;

        if removed > 0 {
            tracing::debug!(session_id = %session_id, parts = removed, "Deleted upload parts");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(key: &str, size: u64) -> ObjectMetadata {
        ObjectMetadata {
            key: key.to_string(),
            size,
            etag: None,
        }
    }

    #[test]
    fn test_part_size_stays_within_part_limit() {
        const MIB: u64 = 1024 * 1024;
        const GIB: u64 = 1024 * MIB;

        assert_eq!(part_size(0), 8 * MIB as usize);
        assert_eq!(part_size(50 * GIB), 8 * MIB as usize);

        for total in [78 * GIB, 100 * GIB, 250 * GIB] {
            let size = part_size(total) as u64;
            assert!(size >= 8 * MIB);
            assert!(total.div_ceil(size) <= MAX_PARTS, "{} bytes need too many parts", total);
        }
    }

    #[test]
    fn test_part_offset() {
        assert_eq!(
            part_offset("uploads/partials/abc/00000000000000001024.part"),
            Some(1024)
        );
        assert_eq!(part_offset("uploads/partials/abc/garbage"), None);
    }

    #[test]
    fn test_contiguous_parts() {
        let parts = vec![
            part("p/s/00000000000000000000.part", 10),
            part("p/s/00000000000000000010.part", 5),
        ];
        assert_eq!(check_contiguous(&parts).unwrap(), 15);
        assert_eq!(check_contiguous(&[]).unwrap(), 0);
    }

    #[test]
    fn test_gap_is_rejected() {
        let parts = vec![
            part("p/s/00000000000000000000.part", 10),
            part("p/s/00000000000000000012.part", 5),
        ];
        assert!(matches!(
            check_contiguous(&parts),
            Err(UploadError::StorageBackendError(_))
        ));
    }
}
