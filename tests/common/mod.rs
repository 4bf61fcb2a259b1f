// Shared plumbing for the integration tests.

use std::net::TcpListener;
use std::time::Duration;

/// Picks a port the OS just confirmed free. The listener is dropped right
/// away, so a parallel test could race for it; port-binding tests run
/// under `#[serial]`.
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("should bind an ephemeral port")
        .local_addr()
        .expect("bound socket has an address")
        .port()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Client-side runtime for driving the harness; the server under test
/// always gets its own context from the orchestrator.
pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("should build client runtime")
}

/// Polls until something is accepting on the loopback port.
pub async fn wait_for_port(port: u16) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .is_ok()
        {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "port {port} never became ready"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
