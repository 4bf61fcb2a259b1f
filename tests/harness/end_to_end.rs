// Full harness runs against the reference binding.

use std::time::Duration;

use futures::future::BoxFuture;
use gatecheck_core::types;
use gatecheck_core::Application;
use gatecheck_harness::{Harness, HarnessError};
use gatecheck_hyper::HyperBinding;
use ntest::timeout;
use serial_test::serial;
use tokio::net::TcpListener;

use crate::common;

/// WHY: The builtin catalog is the behavioral contract; the reference
/// binding must satisfy all of it.
/// WHAT: Boots the binding through the orchestrator and drives every
/// scenario once over loopback.
#[test]
#[serial]
#[timeout(120_000)]
fn full_suite_passes_against_reference_binding() {
    common::init_tracing();
    let port = common::free_port();

    let report = common::runtime()
        .block_on(
            Harness::new(port, port).run(HyperBinding::new(), gatecheck_suite::builtin()),
        )
        .expect("server should start");

    assert_eq!(
        report.outcomes().len(),
        gatecheck_suite::builtin().scenario_count()
    );
    assert!(report.all_passed(), "failures:\n{report}");
}

/// WHY: Two runs against the same correct server must agree, or the suite
/// cannot be trusted as a regression gate.
/// WHAT: Runs the full catalog twice on fresh ports and compares
/// per-scenario outcomes.
#[test]
#[serial]
#[timeout(240_000)]
fn suite_runs_are_deterministic() {
    common::init_tracing();
    let runtime = common::runtime();

    let mut verdicts = Vec::new();
    for _ in 0..2 {
        let port = common::free_port();
        let report = runtime
            .block_on(
                Harness::new(port, port).run(HyperBinding::new(), gatecheck_suite::builtin()),
            )
            .expect("server should start");
        verdicts.push(
            report
                .outcomes()
                .iter()
                .map(|o| (o.name, o.passed()))
                .collect::<Vec<_>>(),
        );
    }

    assert_eq!(verdicts[0], verdicts[1]);
    assert!(verdicts[0].iter().all(|(_, passed)| *passed));
}

/// WHY: The client-facing port may legitimately differ from the bind port
/// when a forwarder sits in between; the run must still pass, with the
/// port-sensitive assertion relaxed.
/// WHAT: Runs the catalog through a dumb TCP forwarder on a second port.
#[test]
#[serial]
#[timeout(240_000)]
fn proxy_style_run_with_diverging_ports() {
    common::init_tracing();
    let bind_port = common::free_port();
    let client_port = common::free_port();
    let runtime = common::runtime();

    let report = runtime.block_on(async {
        // Bind the forwarder before any scenario can race it.
        let listener = TcpListener::bind(("127.0.0.1", client_port))
            .await
            .expect("forwarder port should be free");
        let forwarder = tokio::spawn(async move {
            loop {
                let Ok((mut inbound, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    match tokio::net::TcpStream::connect(("127.0.0.1", bind_port)).await {
                        Ok(mut upstream) => {
                            let _ = tokio::io::copy_bidirectional(&mut inbound, &mut upstream)
                                .await;
                        }
                        Err(err) => tracing::error!("Forwarder could not reach upstream: {err}"),
                    }
                });
            }
        });

        let report = Harness::new(bind_port, client_port)
            .run(HyperBinding::new(), gatecheck_suite::builtin())
            .await;
        forwarder.abort();
        report
    });

    let report = report.expect("server should start");
    assert!(report.all_passed(), "failures:\n{report}");
}

/// WHY: A server that never starts listening must fail the whole run
/// within the readiness budget, before any scenario produces misleading
/// connection errors.
/// WHAT: Supplies a factory that parks forever without binding.
#[test]
#[serial]
#[timeout(60_000)]
fn startup_failure_when_server_never_listens() {
    common::init_tracing();
    let runtime = common::runtime();

    let factory = |_port: u16, _app: Application| -> BoxFuture<'static, types::Result<()>> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
    };

    let err = runtime.block_on(async {
        let port = common::free_port();
        Harness::new(port, port)
            .ready_timeout(Duration::from_secs(2))
            .run(factory, gatecheck_suite::builtin())
            .await
            .expect_err("run should not start")
    });

    let HarnessError::ServerStartup(reason) = err;
    assert!(
        reason.contains("not accepting connections"),
        "unexpected startup failure text: {reason}"
    );
}

/// WHY: A factory that returns instead of serving is a startup failure,
/// not a hang and not a half-run.
/// WHAT: Supplies a factory whose future resolves immediately with an
/// error.
#[test]
#[serial]
#[timeout(60_000)]
fn startup_failure_when_factory_dies_immediately() {
    common::init_tracing();
    let runtime = common::runtime();

    let factory = |_port: u16, _app: Application| -> BoxFuture<'static, types::Result<()>> {
        Box::pin(async { Err("refusing to start".into()) })
    };

    let err = runtime.block_on(async {
        let port = common::free_port();
        Harness::new(port, port)
            .ready_timeout(Duration::from_secs(5))
            .run(factory, gatecheck_suite::builtin())
            .await
            .expect_err("run should fail fast")
    });

    let HarnessError::ServerStartup(reason) = err;
    assert!(
        reason.contains("refusing to start"),
        "factory error should be carried through, got: {reason}"
    );
}
