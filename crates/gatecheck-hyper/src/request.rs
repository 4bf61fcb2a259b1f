// Builds the request-context mapping out of an inbound hyper request.

use std::io::Cursor;

use bytes::Bytes;
use gatecheck_core::{Environ, Input, Protocol, Scheme};
use http::request::Parts;
use http::Version;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::Request;
use percent_encoding::percent_decode_str;

/// Collects the length-delimited request body, then normalizes the parts.
pub(crate) async fn build_environ(
    req: Request<Incoming>,
    server_name: &str,
    server_port: u16,
) -> Result<Environ, hyper::Error> {
    let (parts, body) = req.into_parts();
    let collected = body.collect().await?.to_bytes();
    Ok(environ_from_parts(&parts, collected, server_name, server_port))
}

/// Pure normalization step, separated from body collection so it can be
/// exercised without sockets.
pub(crate) fn environ_from_parts(
    parts: &Parts,
    body: Bytes,
    server_name: &str,
    server_port: u16,
) -> Environ {
    // The request-target exactly as it came off the wire; http::Uri keeps
    // percent escapes untouched for origin-form targets.
    let request_uri = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), |pq| pq.as_str().to_string());

    let mut environ = Environ::new(parts.method.as_str(), request_uri);
    environ.server_name = server_name.to_string();
    environ.server_port = server_port;
    environ.url_scheme = Scheme::Http;
    environ.server_protocol = match parts.version {
        Version::HTTP_10 => Protocol::Http10,
        _ => Protocol::Http11,
    };

    // Decoded exactly once; a double-escaped sequence keeps its inner
    // escape.
    environ.path_info = percent_decode_str(parts.uri.path())
        .decode_utf8_lossy()
        .into_owned();
    environ.query_string = parts.uri.query().unwrap_or_default().to_string();

    for name in parts.headers.keys() {
        match name.as_str() {
            "content-length" => {
                environ.content_length = parts
                    .headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
            }
            "content-type" => {
                environ.content_type = parts
                    .headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(ToString::to_string);
            }
            _ => {
                for value in parts.headers.get_all(name) {
                    let text = String::from_utf8_lossy(value.as_bytes());
                    environ.push_header(name.as_str(), &text);
                }
            }
        }
    }

    environ.input = Input::new(Cursor::new(body.to_vec()));
    environ
}
