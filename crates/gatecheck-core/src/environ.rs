// Request-context mapping built by a server binding for every inbound
// request and handed to the application callback.

use core::fmt;
use std::io::{self, Read, Write};

/// URL scheme the request was served over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol version of the inbound request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http10,
    Http11,
}

impl Protocol {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http10 => "HTTP/1.0",
            Protocol::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Readable request-body handle.
///
/// Bindings position this at the first body byte; an application reads at
/// most `CONTENT_LENGTH` bytes from it.
pub struct Input {
    inner: Box<dyn Read + Send>,
}

impl Input {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            inner: Box::new(reader),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            inner: Box::new(io::empty()),
        }
    }

    /// Drains the remaining body bytes.
    pub fn read_to_end(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.inner.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Drains the remaining body bytes as UTF-8 text.
    pub fn read_to_string(&mut self) -> io::Result<String> {
        let mut buf = String::new();
        self.inner.read_to_string(&mut buf)?;
        Ok(buf)
    }
}

impl Read for Input {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Input")
    }
}

/// Writable error-sink handle, always present on the mapping.
///
/// Applications are never required to use it, but a binding must provide a
/// usable sink on every request.
pub struct ErrorSink {
    inner: Box<dyn Write + Send>,
}

impl ErrorSink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Box::new(writer),
        }
    }

    /// Sink that forwards whole lines into the tracing pipeline.
    #[must_use]
    pub fn to_tracing() -> Self {
        Self {
            inner: Box::new(TracingSink),
        }
    }

    /// Writes one diagnostic line.
    pub fn line(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.inner, "{message}")
    }
}

impl Write for ErrorSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorSink")
    }
}

struct TracingSink;

impl Write for TracingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        let trimmed = text.trim_end_matches(['\r', '\n']);
        if !trimmed.is_empty() {
            tracing::error!(target: "gatecheck::app", "{trimmed}");
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The normalized representation of one inbound HTTP request.
///
/// Constructed fresh per request by the server binding and discarded after
/// the application callback returns. `PATH_INFO` is percent-decoded exactly
/// once by the binding; `REQUEST_URI` stays byte-identical to the wire
/// request-target; `QUERY_STRING` is never decoded.
pub struct Environ {
    /// HTTP method, verbatim.
    pub request_method: String,
    /// Always defined, may be empty.
    pub script_name: String,
    /// Path component, percent-decoded exactly once.
    pub path_info: String,
    /// Raw query string, no decoding applied.
    pub query_string: String,
    /// The request-target exactly as sent on the wire.
    pub request_uri: String,
    /// Bound listen address.
    pub server_name: String,
    /// Bound listen port.
    pub server_port: u16,
    pub server_protocol: Protocol,
    pub url_scheme: Scheme,
    /// Mirrored from the `Content-Length` request header when present.
    pub content_length: Option<u64>,
    /// Mirrored from the `Content-Type` request header when present.
    pub content_type: Option<String>,
    /// Request-body handle, positioned at the first body byte.
    pub input: Input,
    /// Error-sink handle; always usable.
    pub errors: ErrorSink,
    headers: Vec<(String, String)>,
}

impl Environ {
    /// New mapping with the given method and literal request-target; every
    /// other field starts at its neutral value for the binding to fill in.
    pub fn new(request_method: impl Into<String>, request_uri: impl Into<String>) -> Self {
        Self {
            request_method: request_method.into(),
            script_name: String::new(),
            path_info: String::new(),
            query_string: String::new(),
            request_uri: request_uri.into(),
            server_name: String::from("127.0.0.1"),
            server_port: 0,
            server_protocol: Protocol::Http11,
            url_scheme: Scheme::Http,
            content_length: None,
            content_type: None,
            input: Input::empty(),
            errors: ErrorSink::to_tracing(),
            headers: Vec::new(),
        }
    }

    /// Records one request header under its `HTTP_<NAME>` key.
    ///
    /// Repeats of the same name merge into a single value joined with
    /// `", "` in the order the binding pushes them.
    pub fn push_header(&mut self, name: &str, value: &str) {
        let key = normalize_header_name(name);
        if let Some((_, existing)) = self.headers.iter_mut().find(|(k, _)| *k == key) {
            existing.push_str(", ");
            existing.push_str(value);
        } else {
            self.headers.push((key, value.to_string()));
        }
    }

    /// Looks up a request header by its wire name (any casing).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        let key = normalize_header_name(name);
        self.headers
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All recorded `HTTP_<NAME>` entries, in received order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Uniform by-key read over the whole mapping.
    ///
    /// Resolves the CGI-style field names plus `gateway.url_scheme` and any
    /// `HTTP_<NAME>` key. The body and error-sink handles are fields, not
    /// string variables, and are not reachable here.
    #[must_use]
    pub fn var(&self, key: &str) -> Option<String> {
        match key {
            "REQUEST_METHOD" => Some(self.request_method.clone()),
            "SCRIPT_NAME" => Some(self.script_name.clone()),
            "PATH_INFO" => Some(self.path_info.clone()),
            "QUERY_STRING" => Some(self.query_string.clone()),
            "REQUEST_URI" => Some(self.request_uri.clone()),
            "SERVER_NAME" => Some(self.server_name.clone()),
            "SERVER_PORT" => Some(self.server_port.to_string()),
            "SERVER_PROTOCOL" => Some(self.server_protocol.as_str().to_string()),
            "CONTENT_LENGTH" => self.content_length.map(|len| len.to_string()),
            "CONTENT_TYPE" => self.content_type.clone(),
            "gateway.url_scheme" => Some(self.url_scheme.as_str().to_string()),
            key if key.starts_with("HTTP_") => self
                .headers
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    }
}

impl fmt::Debug for Environ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environ")
            .field("request_method", &self.request_method)
            .field("request_uri", &self.request_uri)
            .field("path_info", &self.path_info)
            .field("query_string", &self.query_string)
            .field("server_protocol", &self.server_protocol)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

fn normalize_header_name(name: &str) -> String {
    let upper = name.to_ascii_uppercase().replace('-', "_");
    if upper.starts_with("HTTP_") {
        upper
    } else {
        format!("HTTP_{upper}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_names_normalize_to_cgi_form() {
        let mut environ = Environ::new("GET", "/");
        environ.push_header("X-Scenario-Tag", "7");

        assert_eq!(environ.header("x-scenario-tag"), Some("7"));
        assert_eq!(environ.var("HTTP_X_SCENARIO_TAG"), Some("7".to_string()));
    }

    #[test]
    fn repeated_headers_merge_in_received_order() {
        let mut environ = Environ::new("GET", "/");
        environ.push_header("Foo", "bar");
        environ.push_header("foo", "baz");

        assert_eq!(environ.header("Foo"), Some("bar, baz"));
        assert_eq!(environ.headers().count(), 1);
    }

    #[test]
    fn var_resolves_typed_fields() {
        let mut environ = Environ::new("POST", "/a%20b?x=1");
        environ.path_info = "/a b".to_string();
        environ.query_string = "x=1".to_string();
        environ.server_port = 5000;
        environ.content_length = Some(12);

        assert_eq!(environ.var("REQUEST_METHOD"), Some("POST".to_string()));
        assert_eq!(environ.var("REQUEST_URI"), Some("/a%20b?x=1".to_string()));
        assert_eq!(environ.var("PATH_INFO"), Some("/a b".to_string()));
        assert_eq!(environ.var("SERVER_PORT"), Some("5000".to_string()));
        assert_eq!(environ.var("CONTENT_LENGTH"), Some("12".to_string()));
        assert_eq!(environ.var("CONTENT_TYPE"), None);
        assert_eq!(environ.var("gateway.url_scheme"), Some("http".to_string()));
    }

    #[test]
    fn script_name_is_defined_even_when_empty() {
        let environ = Environ::new("GET", "/");
        assert_eq!(environ.var("SCRIPT_NAME"), Some(String::new()));
    }

    #[test]
    fn input_reads_request_body() {
        let mut environ = Environ::new("POST", "/");
        environ.input = Input::new(io::Cursor::new(b"name=miyagawa".to_vec()));
        environ.content_length = Some(13);

        assert_eq!(environ.input.read_to_string().unwrap(), "name=miyagawa");
    }

    #[test]
    fn error_sink_accepts_lines() {
        let mut environ = Environ::new("GET", "/");
        environ.errors.line("diagnostic output").unwrap();
    }
}
