//! In-memory, rewindable request/response bodies.
//!
//! Grounded directly on the Go `CachedReader` (`examples/original_source/cachedreader.go`):
//! a byte slice plus an offset and a closed flag, with `Read`/`Close`/`Reset`.
//! Retrying a request against a different upstream requires replaying the same
//! bytes more than once; `ReplayableBody` is the buffer that makes that possible.

use bytes::Bytes;
use http::Request;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Frame};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

/// The body type used for every outbound hyper request/response in this crate.
pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Error returned by [`ReplayableBody::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayError {
    /// `close()` was called; no further reads are permitted.
    ReaderClosed,
    /// The buffer was never populated from a source.
    NoData,
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayError::ReaderClosed => write!(f, "reader closed"),
            ReplayError::NoData => write!(f, "no data"),
        }
    }
}
impl std::error::Error for ReplayError {}

#[derive(Debug, Default)]
struct ReplayableBuffer {
    bytes: Option<Bytes>,
    offset: usize,
    closed: bool,
}

impl ReplayableBuffer {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize, ReplayError> {
        if self.closed {
            return Err(ReplayError::ReaderClosed);
        }
        let bytes = self.bytes.as_ref().ok_or(ReplayError::NoData)?;
        let remaining = bytes.len() - self.offset;
        if remaining == 0 {
            return Ok(0);
        }
        let n = remaining.min(dst.len());
        dst[..n].copy_from_slice(&bytes[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn reset(&mut self) {
        self.offset = 0;
        self.closed = false;
    }

    fn len(&self) -> usize {
        self.bytes.as_ref().map_or(0, |b| b.len())
    }
}

/// A request or response body materialized entirely in memory so it can be
/// replayed across retry attempts (invariant: concatenating successive
/// `read()` results reproduces the source bytes, and continues to do so after
/// `reset()`). Cloning is cheap — clones share the same backing buffer and
/// cursor, matching the Go original's single mutable `*CachedReader` that
/// every retry attempt resets in place.
#[derive(Debug, Clone)]
pub struct ReplayableBody {
    inner: Arc<Mutex<ReplayableBuffer>>,
}

impl ReplayableBody {
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    pub fn from_bytes(bytes: Bytes) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ReplayableBuffer {
                bytes: Some(bytes),
                offset: 0,
                closed: false,
            })),
        }
    }

    /// Fully drain `body` into memory. No partial streaming — the entire body
    /// is resident before the first upstream attempt is made.
    pub async fn drain<B>(body: B) -> Result<Self, B::Error>
    where
        B: Body<Data = Bytes>,
    {
        let collected = body.collect().await?;
        Ok(Self::from_bytes(collected.to_bytes()))
    }

    /// Reset the read cursor to the start and clear `closed`. Called by the
    /// transport before every attempt (§4.2) — unconditionally, since every
    /// body that reaches a transport in this design is already a
    /// `ReplayableBody`.
    pub fn reset(&self) {
        self.inner.lock().unwrap().reset();
    }

    pub fn close(&self) {
        self.inner.lock().unwrap().close();
    }

    /// Exact byte length, independent of read cursor position. Used for the
    /// `Content-Length` override on buffered responses.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read(&self, dst: &mut [u8]) -> Result<usize, ReplayError> {
        self.inner.lock().unwrap().read(dst)
    }

    pub fn into_box_body(self) -> BoxBody {
        self.map_err(|never| match never {}).boxed()
    }
}

impl Body for ReplayableBody {
    type Data = Bytes;
    type Error = std::convert::Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Poll::Ready(None);
        }
        let Some(bytes) = inner.bytes.clone() else {
            return Poll::Ready(None);
        };
        let remaining = bytes.len() - inner.offset;
        if remaining == 0 {
            return Poll::Ready(None);
        }
        let chunk = bytes.slice(inner.offset..);
        inner.offset = bytes.len();
        Poll::Ready(Some(Ok(Frame::data(chunk))))
    }
}

/// Shallow-copy a request's method/uri/version/headers and clone its body
/// handle. Used to snapshot the last failed request for probe replay
/// (§4.4) — `http::Request` has no `Clone` impl of its own.
pub fn clone_request(req: &Request<ReplayableBody>) -> Request<ReplayableBody> {
    let mut builder = Request::builder()
        .method(req.method().clone())
        .uri(req.uri().clone())
        .version(req.version());
    for (name, value) in req.headers() {
        builder = builder.header(name.clone(), value.clone());
    }
    builder
        .body(req.body().clone())
        .expect("cloning a well-formed request cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_reproduces_source_bytes_in_arbitrary_chunk_sizes() {
        let body = ReplayableBody::from_bytes(Bytes::from_static(b"hello, replayable world"));
        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = body.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"hello, replayable world");
    }

    #[test]
    fn reset_allows_full_replay() {
        let body = ReplayableBody::from_bytes(Bytes::from_static(b"retry me"));
        let mut buf = [0u8; 64];
        let n1 = body.read(&mut buf).unwrap();
        assert_eq!(&buf[..n1], b"retry me");
        assert_eq!(body.read(&mut buf).unwrap(), 0);

        body.reset();
        let n2 = body.read(&mut buf).unwrap();
        assert_eq!(&buf[..n2], b"retry me");
    }

    #[test]
    fn close_rejects_further_reads() {
        let body = ReplayableBody::from_bytes(Bytes::from_static(b"x"));
        body.close();
        let mut buf = [0u8; 8];
        assert_eq!(body.read(&mut buf), Err(ReplayError::ReaderClosed));
    }

    #[test]
    fn empty_buffer_without_a_source_reports_no_data() {
        let buf = ReplayableBuffer::default();
        let mut b = buf;
        let mut dst = [0u8; 4];
        assert_eq!(b.read(&mut dst), Err(ReplayError::NoData));
    }

    #[test]
    fn len_is_unaffected_by_read_cursor() {
        let body = ReplayableBody::from_bytes(Bytes::from_static(b"0123456789"));
        let mut buf = [0u8; 4];
        body.read(&mut buf).unwrap();
        assert_eq!(body.len(), 10);
    }

    #[tokio::test]
    async fn drain_collects_a_hyper_body_into_a_replayable_body() {
        let full = Full::new(Bytes::from_static(b"drained"))
            .map_err(|never: std::convert::Infallible| match never {});
        let replayed = ReplayableBody::drain(full).await.unwrap();
        let mut buf = [0u8; 16];
        let n = replayed.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"drained");
    }
}
