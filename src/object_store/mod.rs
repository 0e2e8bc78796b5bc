mod azure;
mod local;
mod s3;

pub use azure::AzureBlobStore;
pub use local::LocalStore;
pub use s3::S3Store;

pub use crate::hashing::ByteStream;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use ring::hmac;
use thiserror::Error;

use crate::config::{StorageBackend, StorageConfig};

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    /// Missing configuration or unreachable service. The message names the
    /// setting or resource, never a credential value.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Transfer failed: {0}")]
    Transfer(String),
}

impl From<reqwest::Error> for ObjectStoreError {
    fn from(e: reqwest::Error) -> Self {
        ObjectStoreError::Transfer(e.to_string())
    }
}

/// Bytes to write plus their length when the caller knows it up front.
pub struct ObjectBody {
    pub stream: ByteStream,
    pub size: Option<u64>,
}

impl ObjectBody {
    pub fn new(stream: ByteStream, size: Option<u64>) -> Self {
        Self { stream, size }
    }
}

impl From<Bytes> for ObjectBody {
    fn from(data: Bytes) -> Self {
        let size = data.len() as u64;
        let stream: ByteStream = Box::pin(futures::stream::iter([Ok::<_, std::io::Error>(data)]));
        Self {
            stream,
            size: Some(size),
        }
    }
}

/// A partial read: `size` bytes starting at `offset`, or to the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRange {
    pub offset: u64,
    pub size: Option<u64>,
}

impl ByteRange {
    /// HTTP `Range` header value. Callers never pass an empty range.
    pub fn header_value(&self) -> String {
        match self.size {
            Some(size) => format!("bytes={}-{}", self.offset, self.offset + size - 1),
            None => format!("bytes={}-", self.offset),
        }
    }
}

/// An open object read. `size` is the length of the returned slice.
pub struct ObjectStream {
    pub stream: ByteStream,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// Abstraction over object storage backends.
/// Keys are file UUIDs -- the raw blobs are meaningless without the metadata DB.
///
/// One instance is shared by every concurrent request, so implementations
/// build their client handles once in [`ObjectStore::initialize`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Validate configuration and connect. Idempotent.
    async fn initialize(&self) -> Result<(), ObjectStoreError>;

    /// Write the whole body under `key`, returning the number of bytes stored.
    async fn put(&self, key: &str, body: ObjectBody) -> Result<u64, ObjectStoreError>;

    async fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ObjectStream, ObjectStoreError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;

    /// Every object currently held by the backend.
    async fn list(&self) -> Result<Vec<ObjectInfo>, ObjectStoreError>;

    /// Remove leftovers of writes that never finished and are older than
    /// `older_than`, returning what was removed. Backends whose writes are
    /// all-or-nothing have nothing to reclaim.
    async fn reclaim_incomplete(
        &self,
        _older_than: Duration,
    ) -> Result<Vec<ObjectInfo>, ObjectStoreError> {
        Ok(Vec::new())
    }
}

/// Build the backend selected by configuration. It still needs `initialize()`.
pub fn from_config(config: &StorageConfig) -> Arc<dyn ObjectStore> {
    match config.backend {
        StorageBackend::Local => Arc::new(LocalStore::new(&config.local_storage_path)),
        StorageBackend::S3 => Arc::new(S3Store::new(config.s3.clone())),
        StorageBackend::Azure => Arc::new(AzureBlobStore::new(config.azure.clone())),
    }
}

/// Fetch a required setting or fail naming the environment variable.
pub(crate) fn require<'a>(
    value: &'a Option<String>,
    variable: &str,
) -> Result<&'a str, ObjectStoreError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ObjectStoreError::Unavailable(format!("{variable} is not set")))
}

pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

/// RFC 3986 percent-encoding of everything but unreserved characters.
pub(crate) fn uri_encode(value: &str, encode_slash: bool) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            b'/' if !encode_slash => encoded.push('/'),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// Turn an unsuccessful HTTP response into an error, keeping the body for context.
pub(crate) async fn status_error(resp: reqwest::Response, action: &str) -> ObjectStoreError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    ObjectStoreError::Transfer(format!("{action} failed ({status}): {body}"))
}

/// Collect a stream into memory. Used when a backend insists on a length.
pub(crate) async fn collect(mut stream: ByteStream) -> Result<Bytes, ObjectStoreError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Send `request` with `stream` as its body.
///
/// The stream is pumped through a channel on the current task so the request
/// body only needs to be `Send`, and a source error aborts the request body.
pub(crate) async fn send_streaming(
    request: reqwest::RequestBuilder,
    mut stream: ByteStream,
) -> Result<reqwest::Response, ObjectStoreError> {
    let (mut tx, rx) = futures::channel::mpsc::channel::<Result<Bytes, std::io::Error>>(4);

    let pump = async move {
        let mut source_error = None;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    let _ = tx.send(Err(e)).await;
                    source_error = Some(message);
                    break;
                }
            }
        }
        source_error
    };

    let send = request.body(reqwest::Body::wrap_stream(rx)).send();
    let (source_error, response) = tokio::join!(pump, send);

    if let Some(message) = source_error {
        return Err(ObjectStoreError::Transfer(format!(
            "source stream failed: {message}"
        )));
    }
    Ok(response?)
}

/// Map a streamed HTTP response body into a [`ByteStream`].
pub(crate) fn response_stream(resp: reqwest::Response) -> ByteStream {
    Box::pin(
        resp.bytes_stream()
            .map(|r| r.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))),
    )
}
