// Response tuple returned by gateway applications: a status code, an
// ordered header list that may repeat names, and a body that is either
// in-memory chunks or a streaming source with a close hook.

use core::fmt;
use std::collections::VecDeque;
use std::fs;
use std::io::{self, Read};
use std::path::Path;

use bytes::Bytes;
use http::StatusCode;

const STREAM_CHUNK_SIZE: usize = 8 * 1024;

/// Streaming response-body source.
///
/// The serving layer drains chunks until `Ok(None)` and then calls
/// [`BodyStream::close`] exactly once, on every exit path: normal
/// completion, client disconnect, or a mid-stream write error.
pub trait BodyStream: Send {
    /// Next chunk of body bytes; `Ok(None)` once the source is drained.
    fn next_chunk(&mut self) -> io::Result<Option<Bytes>>;

    /// Releases whatever the stream holds open.
    fn close(&mut self) {}
}

/// Response body: buffered chunks or a streaming source.
pub enum Body {
    Chunks(Vec<Bytes>),
    Stream(Box<dyn BodyStream>),
}

impl Body {
    #[must_use]
    pub fn empty() -> Self {
        Body::Chunks(Vec::new())
    }

    pub fn from_chunk(chunk: impl Into<Bytes>) -> Self {
        Body::Chunks(vec![chunk.into()])
    }

    #[must_use]
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        Body::Chunks(chunks)
    }

    /// Streams an arbitrary readable source.
    pub fn reader(reader: impl Read + Send + 'static) -> Self {
        Body::Stream(Box::new(ReaderStream::new(reader)))
    }

    /// Streams a file from disk.
    pub fn file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = fs::File::open(path)?;
        Ok(Body::reader(file))
    }

    /// Total byte length, known only for buffered chunks.
    #[must_use]
    pub fn len(&self) -> Option<usize> {
        match self {
            Body::Chunks(chunks) => Some(chunks.iter().map(Bytes::len).sum()),
            Body::Stream(_) => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Chunks(chunks) => f.debug_tuple("Chunks").field(&chunks.len()).finish(),
            Body::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Fixed sequence of chunks with an optional close hook.
///
/// The hook fires at most once no matter how often `close` is invoked,
/// so a serving layer's exactly-once obligation stays observable.
pub struct ChunkedStream {
    chunks: VecDeque<Bytes>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl ChunkedStream {
    #[must_use]
    pub fn new(chunks: Vec<Bytes>) -> Self {
        Self {
            chunks: chunks.into(),
            on_close: None,
        }
    }

    #[must_use]
    pub fn on_close(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }
}

impl BodyStream for ChunkedStream {
    fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        Ok(self.chunks.pop_front())
    }

    fn close(&mut self) {
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

/// Streams any `Read` source in fixed-size chunks.
pub struct ReaderStream {
    reader: Box<dyn Read + Send>,
    chunk_size: usize,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl ReaderStream {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            chunk_size: STREAM_CHUNK_SIZE,
            on_close: None,
        }
    }

    #[must_use]
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    #[must_use]
    pub fn on_close(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }
}

impl BodyStream for ReaderStream {
    fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let mut buf = vec![0u8; self.chunk_size];
        let read = self.reader.read(&mut buf)?;
        if read == 0 {
            return Ok(None);
        }
        buf.truncate(read);
        Ok(Some(Bytes::from(buf)))
    }

    fn close(&mut self) {
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

/// The three-part value an application returns for one request.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    /// Ordered name/value pairs; names may repeat.
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl Response {
    #[must_use]
    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Body::empty(),
        }
    }

    /// Plain-text `200` response.
    pub fn text(content: impl Into<Bytes>) -> Self {
        Self::with_status(StatusCode::OK)
            .header("Content-Type", "text/plain")
            .body(Body::from_chunk(content))
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// First header value for `name`, compared case-insensitively.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn drain(stream: &mut dyn BodyStream) -> Vec<u8> {
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next_chunk().unwrap() {
            collected.extend_from_slice(&chunk);
        }
        collected
    }

    #[test]
    fn chunked_stream_yields_chunks_in_order() {
        let mut stream = ChunkedStream::new(vec![
            Bytes::from_static(b"1"),
            Bytes::from_static(b"2"),
            Bytes::from_static(b"3"),
            Bytes::from_static(b"4"),
        ]);

        assert_eq!(drain(&mut stream), b"1234");
        assert!(stream.next_chunk().unwrap().is_none());
    }

    #[test]
    fn chunked_stream_close_hook_fires_once() {
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        let mut stream = ChunkedStream::new(vec![Bytes::from_static(b"x")])
            .on_close(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        drain(&mut stream);
        stream.close();
        stream.close();

        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reader_stream_respects_chunk_size() {
        let mut stream = ReaderStream::new(io::Cursor::new(b"abcdef".to_vec())).chunk_size(4);

        assert_eq!(stream.next_chunk().unwrap().unwrap().as_ref(), b"abcd");
        assert_eq!(stream.next_chunk().unwrap().unwrap().as_ref(), b"ef");
        assert!(stream.next_chunk().unwrap().is_none());
    }

    #[test]
    fn buffered_body_knows_its_length() {
        let body = Body::from_chunks(vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")]);
        assert_eq!(body.len(), Some(4));

        let streamed = Body::reader(io::Cursor::new(Vec::new()));
        assert_eq!(streamed.len(), None);
    }

    #[test]
    fn response_builder_preserves_header_order_and_repeats() {
        let response = Response::with_status(StatusCode::OK)
            .header("X-One", "a")
            .header("x-one", "b");

        assert_eq!(response.headers.len(), 2);
        assert_eq!(response.header_value("X-ONE"), Some("a"));
    }
}
