//! Configuration management for the Tusk server

use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::upload::notifier::DEFAULT_COMPLETED_HISTORY;
use crate::upload::types::{DEFAULT_EXPIRY_SECS, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_UPLOAD_SIZE};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL used to build `Location` headers
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the local backend
    pub local_dir: String,
    /// Required when `backend` is `s3`
    pub s3: Option<S3Config>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    S3,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub provider: StorageProvider,
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
    /// Key prefix for partial chunks and finished objects
    pub prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Minio,
    R2,
    S3,
    B2,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub max_size: u64,
    /// Largest PATCH body accepted in one request
    pub max_chunk_size: u64,
    pub expiry_secs: u64,
    pub cleanup_interval_secs: u64,
    pub completed_history: usize,
}

impl UploadConfig {
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 1080,
                public_url: "http://localhost:1080".to_string(),
            },
            storage: StorageConfig {
                backend: StorageBackend::Local,
                local_dir: "./data".to_string(),
                s3: None,
            },
            upload: UploadConfig {
                max_size: DEFAULT_MAX_UPLOAD_SIZE,
                max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
                expiry_secs: DEFAULT_EXPIRY_SECS,
                cleanup_interval_secs: 300,
                completed_history: DEFAULT_COMPLETED_HISTORY,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port: u16 = parse_var("SERVER_PORT", 1080)?;

        let backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "local" => StorageBackend::Local,
            "s3" => StorageBackend::S3,
            other => {
                return Err(ConfigError::Invalid {
                    var: "STORAGE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let s3 = match backend {
            StorageBackend::S3 => Some(S3Config {
                provider: match env::var("S3_PROVIDER")
                    .unwrap_or_else(|_| "minio".to_string())
                    .as_str()
                {
                    "r2" => StorageProvider::R2,
                    "s3" => StorageProvider::S3,
                    "b2" => StorageProvider::B2,
                    _ => StorageProvider::Minio,
                },
                endpoint: required_var("S3_ENDPOINT")?,
                bucket: required_var("S3_BUCKET")?,
                access_key: required_var("S3_ACCESS_KEY")?,
                secret_key: required_var("S3_SECRET_KEY")?,
                region: env::var("S3_REGION").ok(),
                prefix: env::var("S3_PREFIX").unwrap_or_else(|_| "uploads".to_string()),
            }),
            StorageBackend::Local => None,
        };

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port,
                public_url: env::var("PUBLIC_URL")
                    .unwrap_or_else(|_| format!("http://localhost:{}", port))
                    .trim_end_matches('/')
                    .to_string(),
            },
            storage: StorageConfig {
                backend,
                local_dir: env::var("STORAGE_DIR").unwrap_or_else(|_| "./data".to_string()),
                s3,
            },
            upload: UploadConfig {
                max_size: parse_var("UPLOAD_MAX_SIZE", DEFAULT_MAX_UPLOAD_SIZE)?,
                max_chunk_size: parse_var("UPLOAD_MAX_CHUNK_SIZE", DEFAULT_MAX_CHUNK_SIZE)?,
                expiry_secs: parse_var("UPLOAD_EXPIRY_SECS", DEFAULT_EXPIRY_SECS)?,
                cleanup_interval_secs: parse_var("UPLOAD_CLEANUP_INTERVAL_SECS", 300)?,
                completed_history: parse_var("UPLOAD_COMPLETED_HISTORY", DEFAULT_COMPLETED_HISTORY)?,
            },
        })
    }

    /// Address the server binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn required_var(var: &'static str) -> Result<String, ConfigError> {
    env::var(var).map_err(|_| ConfigError::Missing(var))
}

fn parse_var<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 1080);
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert_eq!(config.upload.max_size, 250 * 1024 * 1024 * 1024);
        assert_eq!(config.upload.max_chunk_size, 64 * 1024 * 1024);
        assert_eq!(config.upload.expiry(), Duration::from_secs(86400));
        assert_eq!(config.bind_addr(), "0.0.0.0:1080");
    }

    #[test]
    fn test_parse_var() {
        // Unset variables fall back to the default
        assert_eq!(parse_var("TUSK_TEST_UNSET_VAR", 7u64).unwrap(), 7);

        env::set_var("TUSK_TEST_BAD_NUMBER", "lots");
        assert!(matches!(
            parse_var::<u64>("TUSK_TEST_BAD_NUMBER", 1),
            Err(ConfigError::Invalid { var: "TUSK_TEST_BAD_NUMBER", .. })
        ));

        env::set_var("TUSK_TEST_GOOD_NUMBER", " 42 ");
        assert_eq!(parse_var::<u64>("TUSK_TEST_GOOD_NUMBER", 1).unwrap(), 42);
    }
}
