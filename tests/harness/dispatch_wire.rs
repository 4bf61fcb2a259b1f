// Wire-level behavior of the dispatch shim and the driver's error split,
// observed through a directly-booted reference binding.

use gatecheck_harness::{application, send, DriverError, Harness, RequestSpec, ServerFactory};
use gatecheck_hyper::HyperBinding;
use http::StatusCode;
use ntest::timeout;
use serial_test::serial;

use crate::common;

/// WHY: A request without the routing header is a harness bug and must be
/// loud, not silently mapped onto scenario 0.
/// WHAT: Sends an untagged request straight at the binding and checks the
/// 500 names the missing header.
#[test]
#[serial]
#[timeout(60_000)]
fn missing_routing_header_is_surfaced_loudly() {
    common::init_tracing();
    let runtime = common::runtime();

    runtime.block_on(async {
        let port = common::free_port();
        let app = application(gatecheck_suite::builtin());
        let server = tokio::spawn(HyperBinding::new().serve(port, app));
        common::wait_for_port(port).await;

        let res = send("127.0.0.1", port, RequestSpec::get("/"))
            .await
            .expect("exchange should complete");
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(
            res.text().contains("x-gatecheck-scenario"),
            "500 body should name the routing header, got {:?}",
            res.text()
        );

        server.abort();
    });
}

/// WHY: An out-of-range index must stay an error; remapping it would let a
/// driver bug masquerade as scenario 0 passing.
/// WHAT: Tags a request with an index past the catalog end.
#[test]
#[serial]
#[timeout(60_000)]
fn out_of_range_index_is_not_remapped() {
    common::init_tracing();
    let runtime = common::runtime();

    runtime.block_on(async {
        let port = common::free_port();
        let app = application(gatecheck_suite::builtin());
        let server = tokio::spawn(HyperBinding::new().serve(port, app));
        common::wait_for_port(port).await;

        let spec = RequestSpec::get("/").header("x-gatecheck-scenario", "9999");
        let res = send("127.0.0.1", port, spec)
            .await
            .expect("exchange should complete");
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(
            res.text().contains("out of range"),
            "500 body should describe the bad index, got {:?}",
            res.text()
        );

        server.abort();
    });
}

/// WHY: The driver must keep socket-level failures apart from HTTP error
/// statuses; a parsed 500 is a successful capture.
/// WHAT: Sends to a port nothing listens on and checks the error variant.
#[test]
#[serial]
#[timeout(60_000)]
fn connection_error_is_distinct_from_http_error() {
    common::init_tracing();
    let runtime = common::runtime();

    runtime.block_on(async {
        let port = common::free_port();
        let err = send("127.0.0.1", port, RequestSpec::get("/"))
            .await
            .expect_err("nothing is listening");
        assert!(
            matches!(err, DriverError::Connection(_)),
            "expected a connection error, got {err}"
        );
    });
}

/// WHY: One scenario's assertion failure must not stop the scenarios after
/// it, and the report must carry enough context to diagnose it.
/// WHAT: Runs a catalog whose middle scenario always fails.
#[test]
#[serial]
#[timeout(60_000)]
fn failing_scenario_does_not_stop_the_run() {
    use anyhow::ensure;
    use gatecheck_core::Response;
    use gatecheck_harness::{Catalog, Scenario};

    common::init_tracing();
    let runtime = common::runtime();

    let catalog: &'static Catalog = Box::leak(Box::new(Catalog::from_scenarios(vec![
        Scenario::new(
            "opens",
            |client| async move {
                let res = client.get("/").await?;
                ensure!(res.status == StatusCode::OK, "status: got {}", res.status);
                Ok(())
            },
            |_e| Ok(Response::text("fine")),
        ),
        Scenario::new(
            "always disappointed",
            |client| async move {
                let res = client.get("/").await?;
                ensure!(
                    res.text() == "something else entirely",
                    "expected \"something else entirely\", got {:?}",
                    res.text()
                );
                Ok(())
            },
            |_e| Ok(Response::text("fine")),
        ),
        Scenario::new(
            "closes",
            |client| async move {
                let res = client.get("/").await?;
                ensure!(res.status == StatusCode::OK, "status: got {}", res.status);
                Ok(())
            },
            |_e| Ok(Response::text("fine")),
        ),
    ])));

    let port = common::free_port();
    let report = runtime
        .block_on(Harness::new(port, port).run(HyperBinding::new(), catalog))
        .expect("server should start");

    assert_eq!(report.failure_count(), 1);
    let failed: Vec<_> = report.failures().collect();
    assert_eq!(failed[0].name, "always disappointed");
    assert!(failed[0]
        .failure
        .as_deref()
        .unwrap()
        .contains("something else entirely"));
    assert!(report.outcomes()[2].passed(), "later scenario still ran");
}
