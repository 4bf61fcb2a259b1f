// Reference server binding built on hyper. It exists so the conformance
// kit can exercise itself end-to-end, and doubles as a worked example of
// the `ServerFactory` seam: accept loop, per-request mapping construction,
// application invocation, response serialization.

mod body;
mod request;

use futures::future::BoxFuture;
use gatecheck_core::types;
use gatecheck_core::{Application, Response};
use gatecheck_harness::ServerFactory;
use http::StatusCode;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::body::OutBody;

const LOOPBACK: &str = "127.0.0.1";

/// Serves the gateway application over HTTP/1.x on a loopback port.
#[derive(Debug, Default, Clone, Copy)]
pub struct HyperBinding;

impl HyperBinding {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ServerFactory for HyperBinding {
    fn serve(self, port: u16, app: Application) -> BoxFuture<'static, types::Result<()>> {
        Box::pin(async move {
            let listener = TcpListener::bind((LOOPBACK, port)).await?;
            tracing::info!("Listening on {LOOPBACK}:{port}");

            loop {
                let (stream, _peer) = listener.accept().await?;
                let app = app.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service =
                        service_fn(move |req| handle_request(app.clone(), port, req));
                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        tracing::error!("Failed to serve http1 connection: {err:?}");
                    }
                });
            }
        })
    }
}

async fn handle_request(
    app: Application,
    port: u16,
    req: Request<Incoming>,
) -> Result<hyper::Response<OutBody>, hyper::Error> {
    let mut environ = request::build_environ(req, LOOPBACK, port).await?;

    match app(&mut environ) {
        Ok(response) => Ok(write_response(response)),
        Err(err) => {
            // Application-level failure: answer 500 with the error text so
            // a misrouted request is distinguishable on the wire.
            tracing::error!("Application refused the request: {err}");
            Ok(hyper::Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header("Content-Type", "text/plain")
                .body(body::full(err.to_string()))
                .unwrap())
        }
    }
}

/// Serializes the response tuple. Statuses the transport defines as
/// body-less lose their entity headers and body here no matter what the
/// application supplied; any stream the application handed over is still
/// drained and closed.
fn write_response(response: Response) -> hyper::Response<OutBody> {
    let bodyless = is_bodyless(response.status);

    let mut builder = hyper::Response::builder().status(response.status);
    for (name, value) in &response.headers {
        if bodyless && is_entity_header(name) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }

    let out = if bodyless {
        body::discard(response.body);
        body::empty()
    } else {
        body::from_gateway(response.body)
    };

    match builder.body(out) {
        Ok(wire) => wire,
        Err(err) => {
            tracing::error!("Handler produced an unserializable response: {err}");
            hyper::Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(body::empty())
                .unwrap()
        }
    }
}

fn is_bodyless(status: StatusCode) -> bool {
    status == StatusCode::NOT_MODIFIED
        || status == StatusCode::NO_CONTENT
        || status.is_informational()
}

fn is_entity_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-type")
        || name.eq_ignore_ascii_case("content-length")
        || name.eq_ignore_ascii_case("transfer-encoding")
}
