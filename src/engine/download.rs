use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::{Storage, StorageError};
use crate::object_store::{ByteRange, ByteStream};
use crate::storage::models::FileRecord;

/// Optional slice and cancellation for a download.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub offset: Option<u64>,
    /// Clamped to the end of the object.
    pub size: Option<u64>,
    /// Ends the stream early when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl DownloadOptions {
    pub fn range(offset: u64, size: Option<u64>) -> Self {
        Self {
            offset: Some(offset),
            size,
            cancel: None,
        }
    }
}

/// An opened download. Consume it once, in whichever form fits.
pub struct Download {
    stream: ByteStream,
    offset: u64,
    size: u64,
    total_size: u64,
    mime_type: String,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("total_size", &self.total_size)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

impl Download {
    /// Length of the returned slice, not of the whole object.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Length of the whole object.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn into_stream(self) -> ByteStream {
        self.stream
    }

    /// Buffer the slice. Fails if the stream ends short, e.g. on cancellation.
    pub async fn data(self) -> Result<Bytes, StorageError> {
        let expected = self.size;
        let mut stream = self.stream;
        let mut buf = BytesMut::with_capacity(expected as usize);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StorageError::TransferFailed(e.to_string()))?;
            buf.extend_from_slice(&chunk);
        }
        if buf.len() as u64 != expected {
            return Err(StorageError::TransferFailed(format!(
                "download ended after {} of {expected} bytes",
                buf.len()
            )));
        }
        Ok(buf.freeze())
    }

    /// The slice decoded as UTF-8, with invalid sequences replaced.
    pub async fn text(self) -> Result<String, StorageError> {
        let data = self.data().await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// The slice as a `data:` URI.
    pub async fn base64(self) -> Result<String, StorageError> {
        let mime_type = self.mime_type.clone();
        let data = self.data().await?;
        Ok(format!("data:{mime_type};base64,{}", STANDARD.encode(&data)))
    }
}

impl Storage {
    /// Open a file's bytes, optionally a slice of them.
    ///
    /// An offset past the end of the object is rejected; a size reaching past
    /// it is clamped. Opening the backend stream is retried on transfer
    /// failures. Every successful open counts as a download.
    pub async fn download(
        &self,
        file: &FileRecord,
        options: DownloadOptions,
    ) -> Result<Download, StorageError> {
        let offset = options.offset.unwrap_or(0);
        if offset > 0 && offset >= file.byte_size {
            return Err(StorageError::InvalidRange(format!(
                "offset {offset} is beyond the {} byte object",
                file.byte_size
            )));
        }
        let remaining = file.byte_size - offset;
        let size = options.size.map_or(remaining, |s| s.min(remaining));

        if let Some(ref token) = options.cancel {
            if token.is_cancelled() {
                return Err(StorageError::TransferFailed("download cancelled".to_string()));
            }
        }

        let stream: ByteStream = if size == 0 {
            Box::pin(futures::stream::empty::<Result<Bytes, std::io::Error>>())
        } else {
            let range = (offset > 0 || size < file.byte_size).then_some(ByteRange {
                offset,
                size: Some(size),
            });
            let store = &self.store;
            let key = file.id.as_str();
            let object = self
                .retry
                .run("download", || async move {
                    store.get(key, range).await.map_err(StorageError::from)
                })
                .await?;
            object.stream
        };

        let stream: ByteStream = match options.cancel {
            Some(token) => Box::pin(stream.take_until(token.cancelled_owned())),
            None => stream,
        };

        self.db.increment_downloads(&file.id)?;
        tracing::debug!(file_id = %file.id, offset, bytes = size, "Opened download");

        Ok(Download {
            stream,
            offset,
            size,
            total_size: file.byte_size,
            mime_type: file.mime_type.clone(),
        })
    }
}
