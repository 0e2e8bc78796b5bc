//! The storage engine: content-addressed uploads, reference-counted erase,
//! ranged downloads, orphan reconciliation and the folder tree.
//!
//! [`Storage`] owns the metadata [`Database`] and whichever [`ObjectStore`]
//! was selected at startup. Callers never see the backend directly.

mod download;
mod erase;
mod folders;
mod purge;
mod retry;
mod upload;

pub use download::{Download, DownloadOptions};
pub use erase::EraseOptions;
pub use folders::{
    ChildKind, FolderDeletion, FolderLoad, FolderView, NewFolder, Node, ROOT_FOLDER_NAME,
};
pub use purge::{PurgeStats, PARTIAL_GRACE};
pub use retry::RetryPolicy;
pub use upload::{FileUpload, UrlOverrides};

use std::sync::Arc;

use thiserror::Error;

use crate::hashing::HashError;
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::storage::models::FileRecord;
use crate::storage::{Database, DatabaseError};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Folder not found: {0}")]
    FolderNotFound(String),
    #[error("A file id is required")]
    MissingFileId,
    #[error("Object not found in backend: {0}")]
    ObjectNotFound(String),
    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Transfer failed: {0}")]
    TransferFailed(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Stream was already consumed")]
    StreamExhausted,
    #[error("Remote fetch failed: {0}")]
    RemoteFetchFailed(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Requested range is not satisfiable: {0}")]
    InvalidRange(String),
    #[error("Name already taken: {0}")]
    NameTaken(String),
    #[error("Invalid move: {0}")]
    InvalidMove(String),
    #[error("Database error: {0}")]
    Database(DatabaseError),
}

impl StorageError {
    /// Network or I/O failures that a repeated call may get past.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::TransferFailed(_))
    }
}

impl From<DatabaseError> for StorageError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::FileNotFound(id) => StorageError::FileNotFound(id),
            DatabaseError::FolderNotFound(id) => StorageError::FolderNotFound(id),
            DatabaseError::NameTaken(name) => StorageError::NameTaken(name),
            DatabaseError::InvalidMove(reason) => StorageError::InvalidMove(reason),
            DatabaseError::HashConflict { existing } => {
                StorageError::Conflict(format!("content already stored as {existing}"))
            }
            DatabaseError::RootExists(id) => {
                StorageError::Conflict(format!("root folder already exists: {id}"))
            }
            other => StorageError::Database(other),
        }
    }
}

impl From<ObjectStoreError> for StorageError {
    fn from(e: ObjectStoreError) -> Self {
        match e {
            ObjectStoreError::NotFound(key) => StorageError::ObjectNotFound(key),
            ObjectStoreError::Unavailable(reason) => StorageError::BackendUnavailable(reason),
            ObjectStoreError::Transfer(reason) => StorageError::TransferFailed(reason),
            ObjectStoreError::Io(e) => StorageError::TransferFailed(e.to_string()),
        }
    }
}

impl From<HashError> for StorageError {
    fn from(e: HashError) -> Self {
        match e {
            HashError::StreamExhausted => StorageError::StreamExhausted,
            HashError::Incomplete => StorageError::TransferFailed(e.to_string()),
        }
    }
}

/// Content-addressed file storage over one object store backend.
///
/// Cheap to share behind an `Arc`; every method takes `&self` and no
/// operation holds a lock across backend I/O.
pub struct Storage {
    db: Database,
    store: Arc<dyn ObjectStore>,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl Storage {
    pub fn new(db: Database, store: Arc<dyn ObjectStore>, retry: RetryPolicy) -> Self {
        Self {
            db,
            store,
            http: reqwest::Client::new(),
            retry,
        }
    }

    /// Connect the backend. Safe to call more than once.
    pub async fn initialize(&self) -> Result<(), StorageError> {
        self.store.initialize().await?;
        tracing::info!(backend = self.store.backend_name(), "Storage backend ready");
        Ok(())
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Look up a file by id.
    pub fn resolve_file(&self, id: Option<&str>) -> Result<FileRecord, StorageError> {
        let id = id
            .filter(|id| !id.trim().is_empty())
            .ok_or(StorageError::MissingFileId)?;
        self.db
            .get_file(id)?
            .ok_or_else(|| StorageError::FileNotFound(id.to_string()))
    }
}

/// Trimmed node name. Names are path segments, so they can't be empty or
/// contain `/`.
pub(crate) fn validate_name(name: &str) -> Result<String, StorageError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StorageError::InvalidInput("name must not be empty".to_string()));
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(StorageError::InvalidInput(format!(
            "name must be a single path segment: {name}"
        )));
    }
    Ok(name.to_string())
}
