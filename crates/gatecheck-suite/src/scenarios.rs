// The builtin scenario table. Order matters: a scenario's position is its
// wire-level routing index, so new entries go at the end and nothing gets
// reordered. Every scenario is independently replayable; the only state a
// handler touches beyond its mapping is a fixture file or a counter owned
// by that scenario's own closures.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, ensure};
use bytes::Bytes;
use gatecheck_core::{Body, ChunkedStream, Response};
use gatecheck_harness::{RequestSpec, Scenario};
use http::StatusCode;

use crate::fixtures::{self, Fixture, LARGE_IMAGE, SMALL_IMAGE};

pub(crate) fn builtin_scenarios() -> Vec<Scenario> {
    vec![
        query_string_echo(),
        request_body_echo(),
        url_scheme(),
        streaming_reader_body(),
        binary_file(&SMALL_IMAGE, "small binary file"),
        binary_file(&LARGE_IMAGE, "large binary file streaming"),
        custom_header_echo(),
        cookie_header_echo(),
        joint_environ_fields(),
        server_name_and_port(),
        single_escape_decoding(),
        double_escape_stays_escaped(),
        protocol_and_script_name(),
        close_hook_exactly_once(),
        error_sink_present(),
        status_reason_phrase(),
        repeated_header_merge(),
        entity_suppression_on_304(),
        literal_request_target(),
        handler_error_answers_500(),
        handler_panic_answers_500(),
        still_serving_after_faults(),
    ]
}

fn query_string_echo() -> Scenario {
    Scenario::new(
        "query string echo",
        |client| async move {
            let res = client.get("/?name=miyagawa").await?;
            ensure!(
                res.status == StatusCode::OK,
                "status: expected 200, got {}",
                res.status
            );
            ensure!(
                res.header("Content-Type").as_deref() == Some("text/plain"),
                "Content-Type: expected text/plain, got {:?}",
                res.header("Content-Type")
            );
            ensure!(
                res.text() == "Hello, name=miyagawa",
                "body: expected \"Hello, name=miyagawa\", got {:?}",
                res.text()
            );
            Ok(())
        },
        |environ| Ok(Response::text(format!("Hello, {}", environ.query_string))),
    )
}

fn request_body_echo() -> Scenario {
    const FORM: &str = "name=miyagawa&role=mentor";

    Scenario::new(
        "request body echo",
        |client| async move {
            let res = client
                .send(
                    RequestSpec::post("/")
                        .header("Content-Type", "application/x-www-form-urlencoded")
                        .body(FORM),
                )
                .await?;
            ensure!(res.status == StatusCode::OK, "status: got {}", res.status);
            ensure!(
                res.header("X-Content-Length").as_deref() == Some("25"),
                "X-Content-Length: got {:?}",
                res.header("X-Content-Length")
            );
            ensure!(
                res.header("X-Content-Type").as_deref()
                    == Some("application/x-www-form-urlencoded"),
                "X-Content-Type: got {:?}",
                res.header("X-Content-Type")
            );
            ensure!(res.text() == FORM, "body echo: got {:?}", res.text());
            Ok(())
        },
        |environ| {
            let declared = environ
                .content_length
                .ok_or("request carried no CONTENT_LENGTH")?;
            let content_type = environ
                .content_type
                .clone()
                .ok_or("request carried no CONTENT_TYPE")?;
            let body = environ.input.read_to_string()?;
            if body.len() as u64 != declared {
                return Err(format!(
                    "read {} body bytes, CONTENT_LENGTH declared {declared}",
                    body.len()
                )
                .into());
            }
            Ok(Response::text(body)
                .header("X-Content-Length", declared.to_string())
                .header("X-Content-Type", content_type))
        },
    )
}

fn url_scheme() -> Scenario {
    Scenario::new(
        "url scheme",
        |client| async move {
            let res = client.get("/").await?;
            ensure!(res.text() == "http", "scheme: got {:?}", res.text());
            Ok(())
        },
        |environ| Ok(Response::text(environ.url_scheme.as_str())),
    )
}

fn streaming_reader_body() -> Scenario {
    const TEXT: &[u8] = b"streamed from an arbitrary reader";

    Scenario::new(
        "streaming reader body",
        |client| async move {
            let res = client.get("/").await?;
            ensure!(res.status == StatusCode::OK, "status: got {}", res.status);
            ensure!(
                res.body.as_ref() == TEXT,
                "streamed body mismatch: got {:?}",
                res.text()
            );
            Ok(())
        },
        |_environ| {
            Ok(Response::with_status(StatusCode::OK)
                .header("Content-Type", "text/plain")
                .body(Body::reader(Cursor::new(TEXT.to_vec()))))
        },
    )
}

fn binary_file(fixture: &'static Fixture, name: &'static str) -> Scenario {
    Scenario::new(
        name,
        move |client| async move {
            let res = client.get("/").await?;
            ensure!(res.status == StatusCode::OK, "status: got {}", res.status);
            ensure!(
                res.header("Content-Type").as_deref() == Some(fixture.content_type),
                "Content-Type: got {:?}",
                res.header("Content-Type")
            );
            let expected_len = fixture.byte_len.to_string();
            ensure!(
                res.header("Content-Length").as_deref() == Some(expected_len.as_str()),
                "Content-Length: expected {expected_len}, got {:?}",
                res.header("Content-Length")
            );
            ensure!(
                res.body.len() as u64 == fixture.byte_len,
                "body length: expected {}, got {}",
                fixture.byte_len,
                res.body.len()
            );
            let digest = fixtures::sha1_hex(&res.body);
            ensure!(
                digest == fixture.sha1_hex,
                "checksum: expected {}, got {digest}",
                fixture.sha1_hex
            );
            Ok(())
        },
        move |_environ| {
            Ok(Response::with_status(StatusCode::OK)
                .header("Content-Type", fixture.content_type)
                .header("Content-Length", fixture.byte_len.to_string())
                .body(Body::file(fixture.path())?))
        },
    )
}

fn custom_header_echo() -> Scenario {
    Scenario::new(
        "custom header echo",
        |client| async move {
            let res = client
                .send(RequestSpec::get("/").header("X-Whisper", "quiet-value"))
                .await?;
            ensure!(
                res.text() == "quiet-value",
                "header echo body: got {:?}",
                res.text()
            );
            ensure!(
                res.header("X-Whisper-Back").as_deref() == Some("quiet-value"),
                "X-Whisper-Back: got {:?}",
                res.header("X-Whisper-Back")
            );
            Ok(())
        },
        |environ| {
            let value = environ
                .header("X-Whisper")
                .ok_or("X-Whisper header missing from mapping")?
                .to_string();
            Ok(Response::text(value.clone()).header("X-Whisper-Back", value))
        },
    )
}

fn cookie_header_echo() -> Scenario {
    const COOKIE: &str = "session=deadbeef; theme=dark";

    Scenario::new(
        "cookie header echo",
        |client| async move {
            let res = client
                .send(RequestSpec::get("/").header("Cookie", COOKIE))
                .await?;
            ensure!(res.text() == COOKIE, "cookie echo: got {:?}", res.text());
            Ok(())
        },
        |environ| {
            let cookie = environ
                .header("Cookie")
                .ok_or("HTTP_COOKIE missing from mapping")?;
            Ok(Response::text(cookie.to_string()))
        },
    )
}

fn joint_environ_fields() -> Scenario {
    const KEYS: [&str; 6] = [
        "REQUEST_METHOD",
        "PATH_INFO",
        "QUERY_STRING",
        "SERVER_PROTOCOL",
        "SCRIPT_NAME",
        "gateway.url_scheme",
    ];

    Scenario::new(
        "joint environ fields",
        |client| async move {
            let res = client.get("/fields/echo?a=1&b=2").await?;
            let expected = "GET\n/fields/echo\na=1&b=2\nHTTP/1.1\n\nhttp";
            ensure!(
                res.text() == expected,
                "joint fields: expected {expected:?}, got {:?}",
                res.text()
            );
            Ok(())
        },
        |environ| {
            let mut lines = Vec::with_capacity(KEYS.len());
            for key in KEYS {
                lines.push(environ.var(key).ok_or_else(|| format!("{key} undefined"))?);
            }
            Ok(Response::text(lines.join("\n")))
        },
    )
}

fn server_name_and_port() -> Scenario {
    Scenario::new(
        "server name and port",
        |client| async move {
            let res = client.get("/").await?;
            // SERVER_PORT can only be checked against the client-facing
            // port when it and the bind port are the same run (no proxy in
            // between); otherwise settle for the name.
            if client.ports_coincide() {
                let expected = format!("127.0.0.1:{}", client.port());
                ensure!(
                    res.text() == expected,
                    "server address: expected {expected:?}, got {:?}",
                    res.text()
                );
            } else {
                ensure!(
                    res.text().starts_with("127.0.0.1:"),
                    "server name: got {:?}",
                    res.text()
                );
            }
            Ok(())
        },
        |environ| {
            Ok(Response::text(format!(
                "{}:{}",
                environ.server_name, environ.server_port
            )))
        },
    )
}

fn single_escape_decoding() -> Scenario {
    Scenario::new(
        "single escape decoding",
        |client| async move {
            let res = client.get("/decoded/comma%2cspace%20end").await?;
            ensure!(
                res.text() == "/decoded/comma,space end",
                "decoded path: got {:?}",
                res.text()
            );
            Ok(())
        },
        |environ| Ok(Response::text(environ.path_info.clone())),
    )
}

fn double_escape_stays_escaped() -> Scenario {
    Scenario::new(
        "double escape stays escaped",
        |client| async move {
            let res = client.get("/decoded/%252c").await?;
            ensure!(
                res.text() == "/decoded/%2c",
                "double-escaped path must decode once only, got {:?}",
                res.text()
            );
            Ok(())
        },
        |environ| Ok(Response::text(environ.path_info.clone())),
    )
}

fn protocol_and_script_name() -> Scenario {
    Scenario::new(
        "protocol and script name",
        |client| async move {
            let res = client.get("/").await?;
            ensure!(
                res.text() == "HTTP/1.1;script_name=\"\"",
                "protocol/script line: got {:?}",
                res.text()
            );
            Ok(())
        },
        |environ| {
            let protocol = environ
                .var("SERVER_PROTOCOL")
                .ok_or("SERVER_PROTOCOL undefined")?;
            if protocol != "HTTP/1.0" && protocol != "HTTP/1.1" {
                return Err(format!("unexpected SERVER_PROTOCOL {protocol:?}").into());
            }
            let script_name = environ
                .var("SCRIPT_NAME")
                .ok_or("SCRIPT_NAME must be defined even when empty")?;
            Ok(Response::text(format!("{protocol};script_name={script_name:?}")))
        },
    )
}

fn close_hook_exactly_once() -> Scenario {
    let closed = Arc::new(AtomicUsize::new(0));

    Scenario::new(
        "close hook exactly once",
        |client| async move {
            let first = client.get("/stream").await?;
            ensure!(first.status == StatusCode::OK, "status: got {}", first.status);
            ensure!(
                first.body.as_ref() == b"1234",
                "chunked body: expected \"1234\", got {:?}",
                first.text()
            );

            // The hook runs on the serving side right after the drain;
            // poll briefly so scheduling jitter cannot flake the check.
            let mut last = String::new();
            for _ in 0..80 {
                let count = client.get("/stream?count").await?;
                last = count.text();
                if last == "1" {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            bail!("close hook count settled at {last:?}, expected \"1\"");
        },
        move |environ| {
            if environ.query_string.contains("count") {
                return Ok(Response::text(closed.load(Ordering::SeqCst).to_string()));
            }

            // Fresh delivery: restart the count so the scenario replays
            // identically on every run.
            closed.store(0, Ordering::SeqCst);
            let counter = closed.clone();
            let stream = ChunkedStream::new(vec![
                Bytes::from_static(b"1"),
                Bytes::from_static(b"2"),
                Bytes::from_static(b"3"),
                Bytes::from_static(b"4"),
            ])
            .on_close(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            Ok(Response::with_status(StatusCode::OK)
                .header("Content-Type", "text/plain")
                .body(Body::Stream(Box::new(stream))))
        },
    )
}

fn error_sink_present() -> Scenario {
    Scenario::new(
        "error sink present",
        |client| async move {
            let res = client.get("/").await?;
            ensure!(res.text() == "logged", "error sink body: got {:?}", res.text());
            Ok(())
        },
        |environ| {
            environ.errors.line("handler diagnostic line")?;
            Ok(Response::text("logged"))
        },
    )
}

fn status_reason_phrase() -> Scenario {
    Scenario::new(
        "status reason phrase",
        |client| async move {
            let res = client.get("/nonexistent").await?;
            ensure!(
                res.status == StatusCode::NOT_FOUND,
                "status: expected 404, got {}",
                res.status
            );
            ensure!(
                res.reason() == Some("Not Found"),
                "reason phrase: got {:?}",
                res.reason()
            );
            ensure!(res.text() == "missing", "body: got {:?}", res.text());
            Ok(())
        },
        |_environ| {
            Ok(Response::with_status(StatusCode::NOT_FOUND)
                .header("Content-Type", "text/plain")
                .body(Body::from_chunk("missing")))
        },
    )
}

fn repeated_header_merge() -> Scenario {
    Scenario::new(
        "repeated header merge",
        |client| async move {
            let res = client
                .send(
                    RequestSpec::get("/")
                        .header("X-Both", "bar")
                        .header("X-Both", "baz"),
                )
                .await?;
            ensure!(
                res.text() == "bar, baz",
                "merged header: expected \"bar, baz\", got {:?}",
                res.text()
            );
            Ok(())
        },
        |environ| {
            let merged = environ
                .header("X-Both")
                .ok_or("HTTP_X_BOTH missing from mapping")?;
            Ok(Response::text(merged.to_string()))
        },
    )
}

fn entity_suppression_on_304() -> Scenario {
    Scenario::new(
        "entity suppression on 304",
        |client| async move {
            let res = client.get("/").await?;
            ensure!(
                res.status == StatusCode::NOT_MODIFIED,
                "status: expected 304, got {}",
                res.status
            );
            ensure!(
                res.header("Content-Type").is_none(),
                "Content-Type must be suppressed, got {:?}",
                res.header("Content-Type")
            );
            ensure!(
                res.header("Content-Length").is_none(),
                "Content-Length must be suppressed, got {:?}",
                res.header("Content-Length")
            );
            ensure!(
                res.header("Transfer-Encoding").is_none(),
                "Transfer-Encoding must be suppressed, got {:?}",
                res.header("Transfer-Encoding")
            );
            ensure!(
                res.header("X-Side-Channel").as_deref() == Some("kept"),
                "non-entity headers must survive, got {:?}",
                res.header("X-Side-Channel")
            );
            ensure!(res.body.is_empty(), "304 body must be empty");
            Ok(())
        },
        |_environ| {
            // Deliberately hostile handler output; the serving layer owns
            // the suppression.
            Ok(Response::with_status(StatusCode::NOT_MODIFIED)
                .header("Content-Type", "text/plain")
                .header("Content-Length", "5")
                .header("X-Side-Channel", "kept")
                .body(Body::from_chunk("stale")))
        },
    )
}

fn literal_request_target() -> Scenario {
    Scenario::new(
        "literal request target",
        |client| async move {
            let res = client.get("/foo/bar%20baz?x=a").await?;
            ensure!(
                res.text() == "/foo/bar%20baz?x=a",
                "REQUEST_URI must stay literal, got {:?}",
                res.text()
            );
            ensure!(
                res.header("X-Path-Info").as_deref() == Some("/foo/bar baz"),
                "X-Path-Info: got {:?}",
                res.header("X-Path-Info")
            );
            Ok(())
        },
        |environ| {
            Ok(Response::text(environ.request_uri.clone())
                .header("X-Path-Info", environ.path_info.clone()))
        },
    )
}

fn handler_error_answers_500() -> Scenario {
    Scenario::new(
        "handler error answers 500",
        |client| async move {
            let res = client.get("/").await?;
            ensure!(
                res.status == StatusCode::INTERNAL_SERVER_ERROR,
                "faulting handler: expected 500, got {}",
                res.status
            );
            Ok(())
        },
        |_environ| Err("synthetic gateway fault".into()),
    )
}

fn handler_panic_answers_500() -> Scenario {
    Scenario::new(
        "handler panic answers 500",
        |client| async move {
            let res = client.get("/").await?;
            ensure!(
                res.status == StatusCode::INTERNAL_SERVER_ERROR,
                "panicking handler: expected 500, got {}",
                res.status
            );
            Ok(())
        },
        |_environ| panic!("synthetic handler panic"),
    )
}

fn still_serving_after_faults() -> Scenario {
    Scenario::new(
        "still serving after faults",
        |client| async move {
            let res = client.get("/").await?;
            ensure!(res.status == StatusCode::OK, "status: got {}", res.status);
            ensure!(res.text() == "alive", "body: got {:?}", res.text());
            Ok(())
        },
        |_environ| Ok(Response::text("alive")),
    )
}
