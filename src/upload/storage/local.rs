//! Local filesystem upload storage
//!
//! Partial data lives in `{base}/partials/{session}.part` and is renamed into
//! `{base}/objects/{name}` on finalize.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

use super::{collision_name, storage_error, UploadStorage};
use crate::upload::types::{StorageObject, UploadError};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Local filesystem upload storage
pub struct LocalUploadStorage {
    base_path: PathBuf,
}

impl LocalUploadStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn partial_path(&self, session_id: Uuid) -> PathBuf {
        self.base_path
            .join("partials")
            .join(format!("{}.part", session_id))
    }

    fn objects_dir(&self) -> PathBuf {
        self.base_path.join("objects")
    }

    /// Absolute path of a finalized object key
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }
}

fn missing_session(session_id: Uuid, e: std::io::Error) -> UploadError {
    if e.kind() == ErrorKind::NotFound {
        UploadError::SessionNotFound(session_id.to_string())
    } else {
        storage_error("Failed to open partial upload", e)
    }
}

#[async_trait::async_trait]
impl UploadStorage for LocalUploadStorage {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn create(&self, session_id: Uuid) -> Result<(), UploadError> {
        let path = self.partial_path(session_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error("Failed to create partials directory", e))?;
        }

        fs::File::create(&path)
            .await
            .map_err(|e| storage_error("Failed to create partial upload", e))?;

        Ok(())
    }

    async fn write_chunk(
        &self,
        session_id: Uuid,
        offset: u64,
        data: &[u8],
    ) -> Result<u64, UploadError> {
        let path = self.partial_path(session_id);
        let mut file = OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(|e| missing_session(session_id, e))?;

        let stored = file
            .metadata()
            .await
            .map_err(|e| storage_error("Failed to stat partial upload", e))?
            .len();
        if stored != offset {
            return Err(UploadError::OffsetMismatch {
                expected: stored,
                actual: offset,
            });
        }

        let written = async {
            file.seek(SeekFrom::Start(offset)).await?;
            file.write_all(data).await?;
            file.sync_data().await
        }
        .await;

        if let Err(e) = written {
            // Roll back whatever part of the chunk reached the file
            if let Err(truncate_err) = file.set_len(offset).await {
                tracing::error!(
                    session_id = %session_id,
                    offset = offset,
                    error = %truncate_err,
                    "Failed to roll back partial chunk"
                );
            }
            return Err(storage_error("Failed to write chunk", e));
        }

        Ok(offset + data.len() as u64)
    }

    async fn read_offset(&self, session_id: Uuid) -> Result<u64, UploadError> {
        let metadata = fs::metadata(self.partial_path(session_id))
            .await
            .map_err(|e| missing_session(session_id, e))?;
        Ok(metadata.len())
    }

    async fn finalize(
        &self,
        session_id: Uuid,
        name: &str,
        content_type: Option<&str>,
    ) -> Result<StorageObject, UploadError> {
        let partial = self.partial_path(session_id);
        let mut file = fs::File::open(&partial)
            .await
            .map_err(|e| missing_session(session_id, e))?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
        let mut size = 0u64;
        loop {
            let n = file
                .read(&mut buffer)
                .await
                .map_err(|e| storage_error("Failed to read partial upload", e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            size += n as u64;
        }
        drop(file);

        let objects_dir = self.objects_dir();
        fs::create_dir_all(&objects_dir)
            .await
            .map_err(|e| storage_error("Failed to create objects directory", e))?;

        // A hard link fails rather than replacing an existing object
        let mut final_name = None;
        for candidate in [name.to_string(), collision_name(name, session_id)] {
            match fs::hard_link(&partial, objects_dir.join(&candidate)).await {
                Ok(()) => {
                    final_name = Some(candidate);
                    break;
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::debug!(
                        session_id = %session_id,
                        requested = %name,
                        taken = %candidate,
                        "Object name taken"
                    );
                }
                Err(e) => return Err(storage_error("Failed to move upload into place", e)),
            }
        }
        let final_name = final_name.ok_or_else(|| {
            UploadError::StorageBackendError(format!("No free object name for {}", name))
        })?;

        if let Err(e) = fs::remove_file(&partial).await {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to remove linked partial");
        }

        Ok(StorageObject {
            key: format!("objects/{}", final_name),
            name: final_name,
            size,
            sha256: hex::encode(hasher.finalize()),
            content_type: content_type.map(str::to_string),
            created_at: Utc::now(),
        })
    }

    async fn discard(&self, session_id: Uuid) -> Result<(), UploadError> {
        match fs::remove_file(self.partial_path(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("Failed to remove partial upload", e)),
        }
    }
}
