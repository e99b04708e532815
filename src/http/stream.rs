//! Streaming passthrough for Blob (outbound) and Upload (inbound) routes.
//!
//! # Design Decisions
//! - No buffering: chunks move between the transport and the handler as-is
//! - Backpressure is the transport's: a stream is polled only when the peer
//!   can take more, and the inbound side is read only when the handler asks

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, BodyDataStream, Bytes};
use futures_util::stream::{BoxStream, Stream, StreamExt, TryStreamExt};

use crate::error::{BoxError, Error, Result};

/// What a Blob handler returns.
pub enum Blob {
    /// Complete body written in one operation.
    Bytes(Bytes),
    /// Body pulled chunk by chunk and sent with chunked framing.
    Stream(BoxStream<'static, Result<Bytes, BoxError>>),
}

impl Blob {
    /// Wrap any fallible byte stream.
    pub fn stream<S, B, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: Into<Bytes> + 'static,
        E: Into<BoxError> + 'static,
    {
        Blob::Stream(
            stream
                .map_ok(Into::<Bytes>::into)
                .map_err(Into::<BoxError>::into)
                .boxed(),
        )
    }

    pub(crate) fn into_body(self) -> Body {
        match self {
            Blob::Bytes(bytes) => Body::from(bytes),
            Blob::Stream(stream) => Body::from_stream(stream),
        }
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Blob::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Blob::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Bytes> for Blob {
    fn from(bytes: Bytes) -> Self {
        Blob::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Blob::Bytes(bytes.into())
    }
}

impl From<String> for Blob {
    fn from(text: String) -> Self {
        Blob::Bytes(text.into())
    }
}

impl From<&'static [u8]> for Blob {
    fn from(bytes: &'static [u8]) -> Self {
        Blob::Bytes(Bytes::from_static(bytes))
    }
}

impl From<&'static str> for Blob {
    fn from(text: &'static str) -> Self {
        Blob::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

/// Raw inbound byte stream handed to Upload handlers.
///
/// Pull-based: nothing is read from the connection until the handler polls.
pub struct UploadStream {
    inner: BodyDataStream,
    received: u64,
}

impl UploadStream {
    pub(crate) fn new(body: Body) -> Self {
        Self {
            inner: body.into_data_stream(),
            received: 0,
        }
    }

    /// Next chunk as delivered by the transport, or `None` at end of body.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        self.next().await.transpose()
    }

    /// Total bytes handed out so far.
    pub fn bytes_received(&self) -> u64 {
        self.received
    }
}

impl Stream for UploadStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.received += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(Error::from(e)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl fmt::Debug for UploadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadStream")
            .field("received", &self.received)
            .finish_non_exhaustive()
    }
}
