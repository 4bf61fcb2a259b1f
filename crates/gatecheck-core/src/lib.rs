// Core contract shared by server bindings and the conformance harness: the
// request-context mapping a binding must build from a raw HTTP request, the
// response tuple an application returns, and the callback seam between them.

pub mod environ;
pub mod response;
pub mod types;

pub use environ::{Environ, ErrorSink, Input, Protocol, Scheme};
pub use response::{Body, BodyStream, ChunkedStream, ReaderStream, Response};

use std::sync::Arc;

/// The application callback a server binding invokes once per request.
///
/// The binding owns the mapping's lifecycle: built fresh before the call,
/// discarded after the returned [`Response`] has been written out. Any
/// `Err` must surface to the client as a plain `500`, never as a dead
/// connection or a crashed server process.
pub type Application = Arc<dyn Fn(&mut Environ) -> types::Result<Response> + Send + Sync>;
