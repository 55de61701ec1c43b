//! Lazy byte content
//!
//! [`Content`] is the body of a stored value or an HTTP payload: a stream of
//! [`Bytes`] chunks with an optionally known total size. It is consumed by value,
//! so a body can only be read once; callers that need to replay it materialize it
//! with [`Content::into_bytes`] first.

use crate::error::{Result, VaultError};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Boxed stream of content chunks
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Single-consumption stream of byte chunks
pub struct Content {
    size: Option<u64>,
    stream: ByteStream,
}

impl Content {
    /// Content with no bytes
    pub fn empty() -> Self {
        Content {
            size: Some(0),
            stream: stream::empty().boxed(),
        }
    }

    /// Content backed by an in-memory buffer
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        if data.is_empty() {
            return Content::empty();
        }
        Content {
            size: Some(data.len() as u64),
            stream: stream::once(async move { Ok(data) }).boxed(),
        }
    }

    /// Content backed by an arbitrary chunk stream
    ///
    /// # Arguments
    /// * `stream` - Chunks in order; an `Err` item aborts consumption
    /// * `size` - Total length if known ahead of consumption
    pub fn from_stream<S>(stream: S, size: Option<u64>) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Content {
            size,
            stream: stream.boxed(),
        }
    }

    /// Total size in bytes, if known before consumption
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Consume the whole stream into one buffer
    ///
    /// Fails with the first error yielded by the stream. When the size was
    /// declared up front, a body that ends early or runs long is an I/O error.
    pub async fn into_bytes(mut self) -> Result<Bytes> {
        let mut buffer = BytesMut::with_capacity(self.size.unwrap_or(0).min(16 * 1024 * 1024) as usize);
        while let Some(chunk) = self.stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        if let Some(expected) = self.size {
            if buffer.len() as u64 != expected {
                return Err(VaultError::IoError(format!(
                    "content length mismatch: declared {} bytes, read {}",
                    expected,
                    buffer.len()
                )));
            }
        }
        Ok(buffer.freeze())
    }

    /// Give up the size hint and return the raw chunk stream
    pub fn into_stream(self) -> ByteStream {
        self.stream
    }
}

impl Stream for Content {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content").field("size", &self.size).finish_non_exhaustive()
    }
}

impl From<Bytes> for Content {
    fn from(data: Bytes) -> Self {
        Content::from_bytes(data)
    }
}

impl From<Vec<u8>> for Content {
    fn from(data: Vec<u8>) -> Self {
        Content::from_bytes(data)
    }
}

impl From<&'static str> for Content {
    fn from(data: &'static str) -> Self {
        Content::from_bytes(Bytes::from_static(data.as_bytes()))
    }
}

impl From<String> for Content {
    fn from(data: String) -> Self {
        Content::from_bytes(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_bytes_known_size() {
        let content = Content::from_bytes("hello");
        assert_eq!(content.size(), Some(5));
        assert_eq!(content.into_bytes().await.unwrap(), Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_empty() {
        let content = Content::empty();
        assert_eq!(content.size(), Some(0));
        assert!(content.into_bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_chunks_concatenated() {
        let chunks = vec![Ok(Bytes::from("ab")), Ok(Bytes::from("cd")), Ok(Bytes::from("e"))];
        let content = Content::from_stream(stream::iter(chunks), None);
        assert_eq!(content.size(), None);
        assert_eq!(content.into_bytes().await.unwrap(), Bytes::from("abcde"));
    }

    #[tokio::test]
    async fn test_stream_error_propagates() {
        let chunks = vec![Ok(Bytes::from("ab")), Err(VaultError::IoError("reset".into()))];
        let content = Content::from_stream(stream::iter(chunks), None);
        assert_eq!(
            content.into_bytes().await.unwrap_err(),
            VaultError::IoError("reset".into())
        );
    }

    #[tokio::test]
    async fn test_declared_size_mismatch() {
        let chunks = vec![Ok(Bytes::from("ab"))];
        let content = Content::from_stream(stream::iter(chunks), Some(10));
        assert!(matches!(content.into_bytes().await, Err(VaultError::IoError(_))));
    }
}
