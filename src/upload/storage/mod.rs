//! Storage Backend Adapter
//!
//! Persists received bytes and seals them into immutable objects.
//! Supports both local filesystem and S3 storage backends.

mod local;
mod s3;

pub use local::LocalUploadStorage;
pub use s3::S3UploadStorage;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::naming;
use super::types::{StorageObject, UploadError};

// ============================================================================
// Upload Storage Trait
// ============================================================================

/// Trait for upload storage backends
#[async_trait::async_trait]
pub trait UploadStorage: Send + Sync {
    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;

    /// Prepare storage for a new session
    async fn create(&self, session_id: Uuid) -> Result<(), UploadError>;

    /// Append a chunk at `offset`, returning the new stored byte count.
    ///
    /// Either the whole chunk is stored or nothing is: a failed write leaves
    /// the stored byte count unchanged. A chunk not starting at the current
    /// stored byte count is rejected with `OffsetMismatch`.
    async fn write_chunk(
        &self,
        session_id: Uuid,
        offset: u64,
        data: &[u8],
    ) -> Result<u64, UploadError>;

    /// Bytes durably stored for a session
    async fn read_offset(&self, session_id: Uuid) -> Result<u64, UploadError>;

    /// Seal the session's bytes into an object named `name`
    async fn finalize(
        &self,
        session_id: Uuid,
        name: &str,
        content_type: Option<&str>,
    ) -> Result<StorageObject, UploadError>;

    /// Drop any partial data kept for a session
    async fn discard(&self, session_id: Uuid) -> Result<(), UploadError>;
}

// ============================================================================
// Helpers
// ============================================================================

/// Compute SHA-256 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Name to use when `name` is already taken
pub(crate) fn collision_name(name: &str, session_id: Uuid) -> String {
    let id = session_id.simple().to_string();
    naming::with_suffix(name, &id[..8])
}

fn storage_error(context: &str, e: impl std::fmt::Display) -> UploadError {
    UploadError::StorageBackendError(format!("{}: {}", context, e))
}
