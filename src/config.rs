use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub retry: RetryConfig,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Azure,
    Local,
    S3,
}

/// Backend selection and credentials.
///
/// Backend-specific values stay optional here. The selected backend checks
/// for the ones it needs when it is initialized, and names the missing
/// variable in its error.
#[derive(Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the local backend
    pub local_storage_path: String,
    pub s3: S3Config,
    pub azure: AzureConfig,
}

#[derive(Clone, Default)]
pub struct S3Config {
    pub bucket: Option<String>,
    /// Base URL, e.g. `https://s3.eu-west-1.amazonaws.com` or a MinIO address
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Clone, Default)]
pub struct AzureConfig {
    pub account: Option<String>,
    pub access_key: Option<String>,
    pub container: Option<String>,
    /// Defaults to `https://{account}.blob.core.windows.net`
    pub endpoint: Option<String>,
}

/// Bounded exponential backoff for idempotent backend calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_storage_path: "./files".to_string(),
            s3: S3Config::default(),
            azure: AzureConfig::default(),
        }
    }
}

// Credentials must never end up in logs, so Debug only reports presence.
impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("backend", &self.backend)
            .field("local_storage_path", &self.local_storage_path)
            .field("s3_bucket", &self.s3.bucket)
            .field("s3_endpoint", &self.s3.endpoint)
            .field("s3_credentials", &self.s3.secret_access_key.is_some())
            .field("azure_account", &self.azure.account)
            .field("azure_container", &self.azure.container)
            .field("azure_credentials", &self.azure.access_key.is_some())
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let max_upload_size = std::env::var("MAX_UPLOAD_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50 * 1024 * 1024); // 50MB

        let backend = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "local" => StorageBackend::Local,
            "s3" => StorageBackend::S3,
            "azure" => StorageBackend::Azure,
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "STORAGE_BACKEND must be one of local, s3, azure (got '{other}')"
                )))
            }
        };

        let local_storage_path =
            std::env::var("LOCAL_STORAGE_PATH").unwrap_or_else(|_| "./files".to_string());

        let retry = RetryConfig {
            max_attempts: std::env::var("RETRY_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            base_delay: Duration::from_millis(
                std::env::var("RETRY_BASE_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(100),
            ),
        };

        let config = Config {
            node: NodeConfig {
                bind_address,
                data_dir,
            },
            storage: StorageConfig {
                backend,
                local_storage_path,
                s3: S3Config {
                    bucket: env_opt("S3_BUCKET"),
                    endpoint: env_opt("S3_ENDPOINT"),
                    region: env_opt("S3_REGION"),
                    access_key_id: env_opt("S3_ACCESS_KEY_ID"),
                    secret_access_key: env_opt("S3_SECRET_ACCESS_KEY"),
                },
                azure: AzureConfig {
                    account: env_opt("AZURE_STORAGE_ACCOUNT"),
                    access_key: env_opt("AZURE_STORAGE_ACCESS_KEY"),
                    container: env_opt("AZURE_STORAGE_CONTAINER"),
                    endpoint: env_opt("AZURE_STORAGE_ENDPOINT"),
                },
            },
            retry,
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.node.data_dir.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "DATA_DIR cannot be empty".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "RETRY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        if self.max_upload_size == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_UPLOAD_SIZE must be greater than 0".to_string(),
            ));
        }

        // Purge deletes every unrecognized object under the store directory,
        // the database files included.
        if self.storage.backend == StorageBackend::Local
            && paths_overlap(
                Path::new(&self.storage.local_storage_path),
                Path::new(&self.node.data_dir),
            )
        {
            return Err(ConfigError::ValidationError(format!(
                "LOCAL_STORAGE_PATH ({}) and DATA_DIR ({}) must not overlap",
                self.storage.local_storage_path, self.node.data_dir
            )));
        }

        Ok(())
    }
}

/// True when either path is, or lies inside, the other.
fn paths_overlap(a: &Path, b: &Path) -> bool {
    let (a, b) = (absolute(a), absolute(b));
    a.starts_with(&b) || b.starts_with(&a)
}

fn absolute(path: &Path) -> PathBuf {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return resolved;
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Read an optional variable, treating empty values as unset.
fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
