use super::{Storage, StorageError};
use crate::storage::models::{FileRecord, Release};

#[derive(Debug, Clone, Copy, Default)]
pub struct EraseOptions {
    /// Delete the bytes and the record even if other references remain.
    pub force: bool,
}

impl EraseOptions {
    pub fn force() -> Self {
        Self { force: true }
    }
}

impl Storage {
    /// Drop one reference to a file, deleting it once nothing else points at it.
    ///
    /// Once the file is doomed it leaves the hash index, so a concurrent
    /// duplicate upload stores its own copy instead of referencing this one.
    /// The backend object goes next and the record last. A failure after the
    /// object delete leaves an unindexed record that a repeated erase
    /// finishes.
    pub async fn erase(&self, file: &FileRecord, options: EraseOptions) -> Result<(), StorageError> {
        if options.force {
            if self.db.retire_file(&file.id)?.is_none() {
                return Err(StorageError::FileNotFound(file.id.clone()));
            }
        } else {
            match self.db.release_reference(&file.id)? {
                Some(Release::Remaining(references)) => {
                    tracing::debug!(file_id = %file.id, references, "Released file reference");
                    return Ok(());
                }
                Some(Release::Last) => {}
                None => return Err(StorageError::FileNotFound(file.id.clone())),
            }
        }

        self.remove_retired(&file.id).await?;
        tracing::info!(file_id = %file.id, force = options.force, "Erased file");
        Ok(())
    }

    /// Delete the bytes, then the record, of a file no longer in the hash index.
    pub(super) async fn remove_retired(&self, id: &str) -> Result<(), StorageError> {
        self.store.delete(id).await?;
        self.db.delete_file(id)?;
        Ok(())
    }
}
