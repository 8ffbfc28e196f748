//! Application state management

use std::sync::Arc;

use crate::config::{Config, ConfigError, StorageBackend};
use crate::error::Result;
use crate::storage::S3Client;
use crate::upload::{
    CompletedUploads, CompletionNotifier, LocalUploadStorage, S3UploadStorage, UploadLimits,
    UploadService, UploadStorage,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    service: UploadService,
    completed: Arc<CompletedUploads>,
}

impl AppState {
    /// Build the state with the storage backend named in the configuration
    pub async fn from_config(config: Config) -> Result<Self> {
        let storage: Arc<dyn UploadStorage> = match config.storage.backend {
            StorageBackend::Local => {
                tracing::info!("Local upload storage at {}", config.storage.local_dir);
                Arc::new(LocalUploadStorage::new(&config.storage.local_dir))
            }
            StorageBackend::S3 => {
                let s3 = config
                    .storage
                    .s3
                    .as_ref()
                    .ok_or(ConfigError::Missing("S3_ENDPOINT"))?;
                tracing::info!("S3 endpoint: {}", s3.endpoint);
                tracing::info!("S3 bucket: {}", s3.bucket);
                let client = S3Client::new(s3).await?;
                Arc::new(S3UploadStorage::new(client, s3.prefix.clone()))
            }
        };

        Ok(Self::with_storage(config, storage))
    }

    /// Build the state over an existing storage backend
    pub fn with_storage(config: Config, storage: Arc<dyn UploadStorage>) -> Self {
        let notifier = CompletionNotifier::with_default_hook();
        let completed = Arc::new(CompletedUploads::new(config.upload.completed_history));
        notifier.register(completed.clone());

        let limits = UploadLimits {
            max_size: config.upload.max_size,
            expiry: config.upload.expiry(),
            retention: config.upload.expiry(),
        };
        let service = UploadService::new(storage, notifier, limits);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                service,
                completed,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the upload service
    pub fn service(&self) -> &UploadService {
        &self.inner.service
    }

    /// Recently completed uploads, newest first
    pub fn completed(&self) -> &CompletedUploads {
        &self.inner.completed
    }

    /// Absolute URL of an upload
    pub fn upload_url(&self, id: uuid::Uuid) -> String {
        format!("{}/files/{}", self.inner.config.server.public_url, id)
    }
}
