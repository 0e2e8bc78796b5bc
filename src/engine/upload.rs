use chrono::Utc;
use reqwest::header::CONTENT_TYPE;

use super::{validate_name, Storage, StorageError};
use crate::hashing::{HashedBody, Source};
use crate::object_store::{response_stream, ObjectBody};
use crate::storage::models::{FileRecord, FileType};
use crate::storage::DatabaseError;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Bounds the lookup/insert loop when concurrent uploads of the same bytes
/// keep racing each other.
const MAX_DEDUP_ROUNDS: usize = 5;

/// A logical file to store.
#[derive(Debug)]
pub struct FileUpload {
    pub name: String,
    /// Guessed from `name` when absent.
    pub mime_type: Option<String>,
    /// Byte length if the caller knows it. Lets remote backends stream.
    pub size: Option<u64>,
    pub source: Source,
    /// Target folder. Defaults to the root folder.
    pub parent_id: Option<String>,
    pub description: Option<String>,
    pub source_url: Option<String>,
}

impl FileUpload {
    pub fn new(name: impl Into<String>, source: impl Into<Source>) -> Self {
        Self {
            name: name.into(),
            mime_type: None,
            size: None,
            source: source.into(),
            parent_id: None,
            description: None,
            source_url: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Caller-supplied values that win over what the remote response reports.
#[derive(Debug, Clone, Default)]
pub struct UrlOverrides {
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub parent_id: Option<String>,
    pub description: Option<String>,
}

impl Storage {
    /// Store a file, deduplicating by content hash.
    ///
    /// The bytes are written under a fresh id while being hashed. If a file
    /// with the same hash already exists, the new object is deleted and the
    /// existing record gains a reference instead.
    pub async fn upload(&self, upload: FileUpload) -> Result<FileRecord, StorageError> {
        let name = validate_name(&upload.name)?;
        let parent = match upload.parent_id.as_deref() {
            Some(id) => self
                .db
                .get_folder(id)?
                .ok_or_else(|| StorageError::FolderNotFound(id.to_string()))?,
            None => self.root_folder()?,
        };
        let mime_type = resolve_mime_type(upload.mime_type.as_deref(), &name);

        let id = uuid::Uuid::new_v4().to_string();
        let mut body = HashedBody::from_source(upload.source)
            .await
            .map_err(|e| StorageError::TransferFailed(format!("could not open source: {e}")))?;
        let stream = body.take_stream()?;

        if let Err(e) = self.store.put(&id, ObjectBody::new(stream, upload.size)).await {
            self.discard(&id).await;
            return Err(e.into());
        }

        let digest = match body.finish().await {
            Ok(digest) => digest,
            Err(e) => {
                self.discard(&id).await;
                return Err(e.into());
            }
        };

        let now = Utc::now();
        let record = FileRecord {
            id: id.clone(),
            name,
            hash: digest.hash,
            file_type: FileType::from_mime(&mime_type),
            mime_type,
            byte_size: digest.size,
            references: 1,
            downloads: 0,
            parent_id: Some(parent.id),
            description: upload.description,
            source_url: upload.source_url,
            created_at: now,
            updated_at: now,
        };

        for _ in 0..MAX_DEDUP_ROUNDS {
            // The reference is taken before our copy is dropped. A file whose
            // last reference is being erased is no longer indexed by hash.
            if let Some(file) = self.db.reference_by_hash(&record.hash)? {
                self.discard(&id).await;
                tracing::debug!(file_id = %file.id, references = file.references, "Deduplicated upload");
                return Ok(file);
            }

            match self.db.insert_file(&record) {
                Ok(stored) => {
                    tracing::info!(file_id = %stored.id, bytes = stored.byte_size, "Stored new file");
                    return Ok(stored);
                }
                Err(DatabaseError::HashConflict { existing }) => {
                    tracing::warn!(file_id = %id, existing = %existing, "Concurrent upload of identical content, retrying as duplicate");
                }
                Err(e) => {
                    self.discard(&id).await;
                    return Err(e.into());
                }
            }
        }

        self.discard(&id).await;
        Err(StorageError::Conflict(format!(
            "could not settle content hash {} after {MAX_DEDUP_ROUNDS} attempts",
            record.hash
        )))
    }

    /// Fetch `url` and store the response body.
    ///
    /// The remote must answer 2xx with both `Content-Type` and
    /// `Content-Length`; the body is streamed, never buffered here.
    pub async fn upload_from_url(
        &self,
        url: &str,
        overrides: UrlOverrides,
    ) -> Result<FileRecord, StorageError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| StorageError::InvalidInput(format!("invalid url {url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(StorageError::InvalidInput(format!(
                "unsupported url scheme: {}",
                parsed.scheme()
            )));
        }

        let resp = self
            .http
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| StorageError::RemoteFetchFailed(format!("{url} is unreachable: {e}")))?;

        if !resp.status().is_success() {
            return Err(StorageError::RemoteFetchFailed(format!(
                "{url} answered {}",
                resp.status()
            )));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                StorageError::RemoteFetchFailed(format!("{url} did not report a content type"))
            })?;
        let size = resp.content_length().ok_or_else(|| {
            StorageError::RemoteFetchFailed(format!("{url} did not report a content length"))
        })?;

        let name = overrides
            .name
            .or_else(|| name_from_url(&parsed))
            .unwrap_or_else(|| "download".to_string());

        let upload = FileUpload {
            name,
            mime_type: Some(overrides.mime_type.unwrap_or(content_type)),
            size: Some(size),
            source: Source::Stream(response_stream(resp)),
            parent_id: overrides.parent_id,
            description: overrides.description,
            source_url: Some(url.to_string()),
        };
        self.upload(upload).await
    }

    /// Best-effort removal of an object that no record will point at.
    async fn discard(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            tracing::warn!(key, error = %e, "Failed to discard unreferenced object, leaving it for purge");
        }
    }
}

fn resolve_mime_type(declared: Option<&str>, name: &str) -> String {
    declared
        .map(str::trim)
        .filter(|m| !m.is_empty() && *m != DEFAULT_MIME_TYPE)
        .map(str::to_string)
        .or_else(|| mime_guess::from_path(name).first().map(|m| m.to_string()))
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string())
}

fn name_from_url(url: &reqwest::Url) -> Option<String> {
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_type_prefers_declared() {
        assert_eq!(resolve_mime_type(Some("image/webp"), "a.png"), "image/webp");
    }

    #[test]
    fn test_mime_type_guessed_from_name() {
        assert_eq!(resolve_mime_type(None, "photo.png"), "image/png");
        assert_eq!(
            resolve_mime_type(Some("application/octet-stream"), "notes.txt"),
            "text/plain"
        );
    }

    #[test]
    fn test_mime_type_fallback() {
        assert_eq!(resolve_mime_type(Some(""), "blob"), DEFAULT_MIME_TYPE);
    }

    #[test]
    fn test_name_from_url() {
        let url = reqwest::Url::parse("https://example.com/media/cat.jpg?x=1").unwrap();
        assert_eq!(name_from_url(&url).as_deref(), Some("cat.jpg"));

        let url = reqwest::Url::parse("https://example.com/dir/").unwrap();
        assert_eq!(name_from_url(&url).as_deref(), Some("dir"));

        let url = reqwest::Url::parse("https://example.com").unwrap();
        assert_eq!(name_from_url(&url), None);
    }
}
