use std::time::Duration;

use serde::Serialize;

use super::{Storage, StorageError};

/// Partial writes younger than this may still belong to a running upload.
pub const PARTIAL_GRACE: Duration = Duration::from_secs(60 * 60);

/// What a purge removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeStats {
    pub count: u64,
    /// Total bytes of the deleted objects.
    pub size: u64,
}

impl Storage {
    /// Delete every backend object that no file record points at.
    ///
    /// Runs alongside uploads. An object written by an upload that has not
    /// committed its record yet may be taken as an orphan; each candidate is
    /// re-checked against the database right before it is deleted. A failed
    /// delete is logged and skipped, the next purge picks it up again.
    ///
    /// Leftovers of interrupted writes older than [`PARTIAL_GRACE`] are
    /// removed too and counted with the orphans.
    pub async fn purge(&self) -> Result<PurgeStats, StorageError> {
        let store = &self.store;
        let objects = self
            .retry
            .run("purge list", || async move {
                store.list().await.map_err(StorageError::from)
            })
            .await?;
        let known = self.db.get_all_file_ids()?;

        let mut stats = PurgeStats::default();
        for object in objects.iter().filter(|o| !known.contains(&o.key)) {
            if self.db.get_file(&object.key)?.is_some() {
                continue;
            }

            let key = object.key.as_str();
            let deleted = self
                .retry
                .run("purge delete", || async move {
                    store.delete(key).await.map_err(StorageError::from)
                })
                .await;

            match deleted {
                Ok(()) => {
                    tracing::debug!(key, bytes = object.size, "Purged orphaned object");
                    stats.count += 1;
                    stats.size += object.size;
                }
                Err(e) => {
                    tracing::warn!(key, error = %e, "Failed to purge orphaned object, skipping");
                }
            }
        }

        match store.reclaim_incomplete(PARTIAL_GRACE).await {
            Ok(reclaimed) => {
                for partial in &reclaimed {
                    stats.count += 1;
                    stats.size += partial.size;
                }
                if !reclaimed.is_empty() {
                    tracing::debug!(count = reclaimed.len(), "Reclaimed interrupted writes");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to reclaim interrupted writes, skipping");
            }
        }

        tracing::info!(
            scanned = objects.len(),
            purged = stats.count,
            bytes = stats.size,
            "Purge complete"
        );
        Ok(stats)
    }
}
