//! Streaming SHA-256 over upload sources.
//!
//! Every upload source is normalized into one [`ByteStream`]. The stream is
//! wrapped in a [`HashingStream`] that feeds each chunk to a digest context as
//! it passes downstream, so the object store write and the content hash come
//! from the same single pass over the data. The hash becomes available through
//! a [`PendingDigest`] only once the stream has been drained.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{ready, FutureExt, Stream};
use pin_project_lite::pin_project;
use ring::digest;
use thiserror::Error;
use tokio::sync::oneshot;

/// A byte stream type used for object contents.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

type DeferredSource = Box<dyn FnOnce() -> BoxFuture<'static, std::io::Result<Source>> + Send>;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("Stream was already consumed")]
    StreamExhausted,
    #[error("Stream ended before the content hash was resolved")]
    Incomplete,
}

/// Anything an upload can read its bytes from.
pub enum Source {
    Bytes(Bytes),
    Text(String),
    Stream(ByteStream),
    /// A callable producing another source, possibly after an async wait.
    Deferred(DeferredSource),
}

impl Source {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
    {
        Source::Stream(Box::pin(stream))
    }

    pub fn deferred<F, Fut>(produce: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::io::Result<Source>> + Send + 'static,
    {
        Source::Deferred(Box::new(move || produce().boxed()))
    }

    /// Resolve deferred sources and normalize into a single byte stream.
    pub async fn into_stream(self) -> std::io::Result<ByteStream> {
        let mut source = self;
        loop {
            source = match source {
                Source::Bytes(data) => return Ok(once(data)),
                Source::Text(text) => return Ok(once(Bytes::from(text))),
                Source::Stream(stream) => return Ok(stream),
                Source::Deferred(produce) => produce().await?,
            };
        }
    }
}

impl From<Bytes> for Source {
    fn from(data: Bytes) -> Self {
        Source::Bytes(data)
    }
}

impl From<Vec<u8>> for Source {
    fn from(data: Vec<u8>) -> Self {
        Source::Bytes(Bytes::from(data))
    }
}

impl From<&'static [u8]> for Source {
    fn from(data: &'static [u8]) -> Self {
        Source::Bytes(Bytes::from_static(data))
    }
}

impl From<String> for Source {
    fn from(text: String) -> Self {
        Source::Text(text)
    }
}

impl From<&str> for Source {
    fn from(text: &str) -> Self {
        Source::Text(text.to_string())
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Bytes(data) => write!(f, "Source::Bytes({} bytes)", data.len()),
            Source::Text(text) => write!(f, "Source::Text({} bytes)", text.len()),
            Source::Stream(_) => f.write_str("Source::Stream"),
            Source::Deferred(_) => f.write_str("Source::Deferred"),
        }
    }
}

fn once(data: Bytes) -> ByteStream {
    let chunk: Option<std::io::Result<Bytes>> = (!data.is_empty()).then_some(Ok(data));
    Box::pin(futures::stream::iter(chunk))
}

/// Final hash and length of a drained stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    /// Lowercase hex SHA-256.
    pub hash: String,
    pub size: u64,
}

pin_project! {
    /// Forwards chunks unchanged while accumulating their SHA-256.
    ///
    /// Fused: after end-of-stream or an error it only yields `None`.
    pub struct HashingStream<S> {
        #[pin]
        inner: S,
        context: Option<digest::Context>,
        size: u64,
        sender: Option<oneshot::Sender<ContentDigest>>,
    }
}

impl<S> HashingStream<S> {
    pub fn new(inner: S) -> (Self, PendingDigest) {
        let (sender, receiver) = oneshot::channel();
        let stream = Self {
            inner,
            context: Some(digest::Context::new(&digest::SHA256)),
            size: 0,
            sender: Some(sender),
        };
        (stream, PendingDigest { receiver })
    }
}

impl<S> Stream for HashingStream<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>>,
{
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if this.context.is_none() {
            return Poll::Ready(None);
        }

        match ready!(this.inner.poll_next(cx)) {
            Some(Ok(chunk)) => {
                if let Some(context) = this.context.as_mut() {
                    context.update(&chunk);
                }
                *this.size += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => {
                // Dropping the sender fails the pending digest.
                this.context.take();
                this.sender.take();
                Poll::Ready(Some(Err(e)))
            }
            None => {
                if let Some(context) = this.context.take() {
                    let digest = ContentDigest {
                        hash: hex::encode(context.finish().as_ref()),
                        size: *this.size,
                    };
                    if let Some(sender) = this.sender.take() {
                        let _ = sender.send(digest);
                    }
                }
                Poll::Ready(None)
            }
        }
    }
}

/// The hash of a [`HashingStream`], available once the stream is drained.
#[derive(Debug)]
pub struct PendingDigest {
    receiver: oneshot::Receiver<ContentDigest>,
}

impl PendingDigest {
    /// Wait for the stream to finish. Fails if the stream was dropped or
    /// errored before reaching its end.
    pub async fn resolve(self) -> Result<ContentDigest, HashError> {
        self.receiver.await.map_err(|_| HashError::Incomplete)
    }
}

/// A hashed upload body: the stream may be taken exactly once.
pub struct HashedBody {
    stream: Option<ByteStream>,
    digest: PendingDigest,
}

impl HashedBody {
    pub fn new(stream: ByteStream) -> Self {
        let (stream, digest) = HashingStream::new(stream);
        let stream: ByteStream = Box::pin(stream);
        Self {
            stream: Some(stream),
            digest,
        }
    }

    pub async fn from_source(source: Source) -> std::io::Result<Self> {
        Ok(Self::new(source.into_stream().await?))
    }

    /// Take the hashing stream. A second call fails with
    /// [`HashError::StreamExhausted`].
    pub fn take_stream(&mut self) -> Result<ByteStream, HashError> {
        self.stream.take().ok_or(HashError::StreamExhausted)
    }

    /// Wait for the taken stream to be drained and return its digest.
    pub async fn finish(self) -> Result<ContentDigest, HashError> {
        if self.stream.is_some() {
            // Never read: nothing downstream will ever complete the hash.
            return Err(HashError::Incomplete);
        }
        self.digest.resolve().await
    }
}

/// One-shot SHA-256 of an in-memory buffer, lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(digest::digest(&digest::SHA256, data).as_ref())
}
