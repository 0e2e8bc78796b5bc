use async_trait::async_trait;
use futures::StreamExt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use super::{ByteRange, ObjectBody, ObjectInfo, ObjectStore, ObjectStoreError, ObjectStream};

/// Prefix of in-flight writes. Never listed, never a real key.
const PARTIAL_PREFIX: &str = ".partial-";

/// Local filesystem object store for development and testing.
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(ObjectStoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid object key: {key}"),
            )));
        }
        Ok(self.base_path.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn initialize(&self) -> Result<(), ObjectStoreError> {
        if self.base_path.as_os_str().is_empty() {
            return Err(ObjectStoreError::Unavailable(
                "LOCAL_STORAGE_PATH is not set".to_string(),
            ));
        }
        tokio::fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| {
                ObjectStoreError::Unavailable(format!(
                    "LOCAL_STORAGE_PATH {} is not usable: {e}",
                    self.base_path.display()
                ))
            })?;
        Ok(())
    }

    async fn put(&self, key: &str, body: ObjectBody) -> Result<u64, ObjectStoreError> {
        let path = self.object_path(key)?;
        let partial = self
            .base_path
            .join(format!("{PARTIAL_PREFIX}{key}-{}", uuid::Uuid::new_v4()));

        let written = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            let mut stream = body.stream;
            let mut written = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                written += chunk.len() as u64;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, std::io::Error>(written)
        }
        .await;

        match written {
            Ok(written) => {
                tokio::fs::rename(&partial, &path).await?;
                tracing::debug!(key, bytes = written, "Stored object");
                Ok(written)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(ObjectStoreError::Transfer(format!("write of {key} failed: {e}")))
            }
        }
    }

    async fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ObjectStream, ObjectStoreError> {
        let path = self.object_path(key)?;
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata().await?.len();
        let range = range.unwrap_or_default();
        let start = range.offset.min(len);
        let size = range.size.map_or(len - start, |s| s.min(len - start));

        if start > 0 {
            file.seek(SeekFrom::Start(start)).await?;
        }

        Ok(ObjectStream {
            stream: Box::pin(ReaderStream::new(file.take(size))),
            size,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<ObjectInfo>, ObjectStoreError> {
        let mut objects = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.base_path).await?;

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(PARTIAL_PREFIX) {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            objects.push(ObjectInfo {
                key: name,
                size: meta.len(),
            });
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn reclaim_incomplete(
        &self,
        older_than: Duration,
    ) -> Result<Vec<ObjectInfo>, ObjectStoreError> {
        let mut reclaimed = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.base_path).await?;

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(PARTIAL_PREFIX) {
                continue;
            }
            let meta = entry.metadata().await?;
            let age = meta
                .modified()?
                .elapsed()
                .unwrap_or(Duration::ZERO);
            if !meta.is_file() || age < older_than {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    tracing::debug!(file = %name, bytes = meta.len(), "Removed abandoned partial write");
                    reclaimed.push(ObjectInfo {
                        key: name,
                        size: meta.len(),
                    });
                }
                // Finished or cleaned up meanwhile
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(reclaimed)
    }
}
