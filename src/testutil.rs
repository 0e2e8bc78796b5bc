//! Shared test helpers for file-vault unit tests.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, NodeConfig, RetryConfig, StorageConfig};
use crate::engine::{RetryPolicy, Storage};
use crate::object_store::LocalStore;
use crate::storage::Database;
use crate::AppState;

/// Create a test AppState with a temporary database and local object store.
pub async fn test_state(temp_dir: &tempfile::TempDir) -> Arc<AppState> {
    let data_dir = temp_dir.path().join("data");
    let files_dir = temp_dir.path().join("files");

    let config = Config {
        node: NodeConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: data_dir.to_string_lossy().to_string(),
        },
        storage: StorageConfig {
            local_storage_path: files_dir.to_string_lossy().to_string(),
            ..StorageConfig::default()
        },
        retry: RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
        },
        max_upload_size: 10 * 1024 * 1024, // 10MB for tests
    };

    let db = Database::open(&data_dir).expect("Failed to open test database");
    let store = Arc::new(LocalStore::new(&files_dir));
    let storage = Storage::new(db, store, RetryPolicy::from(config.retry.clone()));
    storage
        .initialize()
        .await
        .expect("Failed to initialize test object store");

    Arc::new(AppState { config, storage })
}
