// HTTP driver: one real loopback connection per exchange, byte-exact in
// both directions. Request-targets go out verbatim (no re-encoding),
// repeated headers keep their order, and the captured response keeps its
// raw body bytes untouched.

use core::fmt;
use std::time::Duration;

use bytes::Bytes;
use derive_more::From;
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use crate::dispatch::SCENARIO_HEADER;

#[derive(Debug, From)]
pub enum DriverError {
    /// Socket-level failure reaching the server; distinct from any parsed
    /// HTTP response, error statuses included.
    Connection(std::io::Error),
    /// Failure while speaking HTTP on an established connection.
    Protocol(hyper::Error),
    /// The request spec could not be turned into a wire request.
    #[from(ignore)]
    InvalidRequest(String),
    /// The exchange outlived the per-request budget.
    #[from(ignore)]
    TimedOut(Duration),
}

impl std::error::Error for DriverError {}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Connection(err) => write!(f, "connection failed: {err}"),
            DriverError::Protocol(err) => write!(f, "http exchange failed: {err}"),
            DriverError::InvalidRequest(reason) => write!(f, "invalid request: {reason}"),
            DriverError::TimedOut(budget) => {
                write!(f, "request did not complete within {budget:?}")
            }
        }
    }
}

/// Fully-specified outbound request.
///
/// `target` is the literal request-target to put on the wire, percent
/// escapes and query string included; the driver never re-encodes it.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl RequestSpec {
    pub fn get(target: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            target: target.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            target: target.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Appends one header; call repeatedly to send the same name twice.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Exact body bytes. The driver computes `Content-Length` from the
    /// byte count, it never guesses from character counts.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

/// Everything the server sent back, captured raw.
#[derive(Debug)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

impl CapturedResponse {
    /// Header value for `name` (case-insensitive); repeats merge in
    /// received order joined with `", "`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    /// Canonical reason phrase for the captured status code.
    #[must_use]
    pub fn reason(&self) -> Option<&'static str> {
        self.status.canonical_reason()
    }

    /// Body bytes as text; invalid UTF-8 is replaced, never dropped.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends one request over a fresh loopback connection and captures the
/// full response.
pub async fn send(
    host: &str,
    port: u16,
    spec: RequestSpec,
) -> Result<CapturedResponse, DriverError> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(DriverError::Connection)?;
    let io = TokioIo::new(stream);

    let (mut sender, conn) = http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .handshake(io)
        .await?;
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            tracing::debug!("Driver connection task ended: {err:?}");
        }
    });

    let request = build_request(host, port, spec)?;
    let response = sender.send_request(request).await?;

    let (parts, body) = response.into_parts();
    let collected = body.collect().await?.to_bytes();

    Ok(CapturedResponse {
        status: parts.status,
        headers: parts.headers,
        body: collected,
    })
}

fn build_request(
    host: &str,
    port: u16,
    spec: RequestSpec,
) -> Result<Request<Full<Bytes>>, DriverError> {
    let uri = Uri::try_from(spec.target.as_str())
        .map_err(|err| DriverError::InvalidRequest(format!("target {:?}: {err}", spec.target)))?;

    let mut builder = Request::builder().method(spec.method.clone()).uri(uri);

    if !spec.has_header("host") {
        builder = builder.header("Host", format!("{host}:{port}"));
    }
    if let Some(body) = &spec.body {
        if !spec.has_header("content-length") {
            builder = builder.header("Content-Length", body.len().to_string());
        }
    }
    for (name, value) in &spec.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let body = Full::new(Bytes::from(spec.body.unwrap_or_default()));
    builder
        .body(body)
        .map_err(|err| DriverError::InvalidRequest(err.to_string()))
}

/// Request-sender capability handed to a scenario's client routine: bound
/// to the client-facing port and to that scenario's routing-header value.
#[derive(Clone)]
pub struct ScenarioClient {
    host: String,
    port: u16,
    index: usize,
    ports_coincide: bool,
    request_timeout: Duration,
}

impl ScenarioClient {
    pub(crate) fn new(
        host: String,
        port: u16,
        index: usize,
        ports_coincide: bool,
        request_timeout: Duration,
    ) -> Self {
        Self {
            host,
            port,
            index,
            ports_coincide,
            request_timeout,
        }
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Client-facing port this capability sends to.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the bind port and client-facing port are the same for this
    /// run. `SERVER_PORT` assertions are only meaningful when they are.
    #[must_use]
    pub fn ports_coincide(&self) -> bool {
        self.ports_coincide
    }

    /// Sends the spec tagged with this scenario's routing header.
    pub async fn send(&self, spec: RequestSpec) -> Result<CapturedResponse, DriverError> {
        let tagged = spec.header(SCENARIO_HEADER, self.index.to_string());
        match tokio::time::timeout(self.request_timeout, send(&self.host, self.port, tagged)).await
        {
            Ok(result) => result,
            Err(_) => Err(DriverError::TimedOut(self.request_timeout)),
        }
    }

    pub async fn get(&self, target: &str) -> Result<CapturedResponse, DriverError> {
        self.send(RequestSpec::get(target)).await
    }
}
