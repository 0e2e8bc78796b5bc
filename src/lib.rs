//! file-vault - content-addressed file storage with folders and swappable backends
//!
//! This crate provides deduplicated file storage with:
//! - Swappable object storage backends (local filesystem, S3, Azure Blob Storage)
//! - Single-pass SHA-256 hashing while bytes stream into the backend
//! - Reference-counted deletes and orphan reconciliation (purge)
//! - A virtual folder tree with per-user ownership records
//! - redb embedded database for metadata (ACID, MVCC, crash-safe)
//! - REST API with streaming multipart upload and ranged downloads

pub mod api;
pub mod config;
pub mod engine;
pub mod hashing;
pub mod object_store;
pub mod storage;
#[cfg(test)]
pub mod testutil;

use config::Config;
use engine::Storage;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub storage: Storage,
}
