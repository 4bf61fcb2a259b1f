// Bridges gateway response bodies onto the hyper connection. Streaming
// sources are pumped from the blocking pool through a channel; their close
// hook runs exactly once on every exit path, including the client hanging
// up mid-stream.

use std::io;

use bytes::Bytes;
use gatecheck_core::{Body, BodyStream};
use http_body_util::{combinators::BoxBody, BodyExt, Full, StreamBody};
use hyper::body::Frame;
use tokio_stream::wrappers::ReceiverStream;

pub(crate) type OutBody = BoxBody<Bytes, io::Error>;

pub(crate) fn empty() -> OutBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

pub(crate) fn full(chunk: impl Into<Bytes>) -> OutBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

pub(crate) fn from_gateway(body: Body) -> OutBody {
    match body {
        Body::Chunks(chunks) => {
            let mut joined = Vec::new();
            for chunk in chunks {
                joined.extend_from_slice(&chunk);
            }
            full(joined)
        }
        Body::Stream(stream) => stream_body(stream),
    }
}

fn stream_body(mut stream: Box<dyn BodyStream>) -> OutBody {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Frame<Bytes>, io::Error>>(4);

    tokio::task::spawn_blocking(move || {
        loop {
            match stream.next_chunk() {
                Ok(Some(chunk)) => {
                    // A failed send means the receiving side is gone; the
                    // close hook below still has to run.
                    if tx.blocking_send(Ok(Frame::data(chunk))).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    let _ = tx.blocking_send(Err(err));
                    break;
                }
            }
        }
        stream.close();
    });

    StreamBody::new(ReceiverStream::new(rx)).boxed()
}

/// Drains and closes a body that will never reach the wire (bodyless
/// statuses). The close obligation holds on this path too.
pub(crate) fn discard(body: Body) {
    if let Body::Stream(mut stream) = body {
        tokio::task::spawn_blocking(move || {
            while let Ok(Some(_)) = stream.next_chunk() {}
            stream.close();
        });
    }
}
