// The single application callback installed into a server under test. It
// routes each inbound request to one catalog scenario by the index carried
// in the reserved routing header, and walls one handler's failure off from
// the rest of the run.

use core::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use derive_more::From;
use gatecheck_core::{Application, Environ, Response};
use http::StatusCode;

use crate::scenario::{Catalog, CatalogError, Scenario};

/// Reserved request header carrying the decimal scenario index.
pub const SCENARIO_HEADER: &str = "x-gatecheck-scenario";

/// A request that cannot be routed to a scenario. Always a harness or
/// driver bug, so it is surfaced as its own error rather than mapped onto
/// some default scenario.
#[derive(Debug, From)]
pub enum RoutingError {
    MissingHeader,
    #[from(ignore)]
    UnparsableIndex(String),
    OutOfRange(CatalogError),
}

impl std::error::Error for RoutingError {}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingError::MissingHeader => {
                write!(f, "request carries no {SCENARIO_HEADER} header")
            }
            RoutingError::UnparsableIndex(value) => {
                write!(f, "{SCENARIO_HEADER} value {value:?} is not a decimal index")
            }
            RoutingError::OutOfRange(err) => write!(f, "{err}"),
        }
    }
}

/// Builds the dispatch application over a catalog.
///
/// Handler faults (an `Err` or a panic) become a bare `500` so one broken
/// scenario can neither kill the server process nor leak into the
/// scenarios that follow. Routing failures propagate as [`RoutingError`].
#[must_use]
pub fn application(catalog: &'static Catalog) -> Application {
    Arc::new(move |environ: &mut Environ| {
        let scenario = match route(catalog, environ) {
            Ok(scenario) => scenario,
            Err(err) => {
                tracing::error!(
                    "Refusing to dispatch {} {}: {err}",
                    environ.request_method,
                    environ.request_uri
                );
                return Err(Box::new(err));
            }
        };

        match panic::catch_unwind(AssertUnwindSafe(|| (scenario.handler)(environ))) {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => {
                tracing::warn!("Handler for scenario `{}` failed: {err}", scenario.name);
                Ok(bare_server_error())
            }
            Err(payload) => {
                tracing::warn!(
                    "Handler for scenario `{}` panicked: {}",
                    scenario.name,
                    panic_text(payload.as_ref())
                );
                Ok(bare_server_error())
            }
        }
    })
}

fn route<'c>(catalog: &'c Catalog, environ: &Environ) -> Result<&'c Scenario, RoutingError> {
    let value = environ
        .header(SCENARIO_HEADER)
        .ok_or(RoutingError::MissingHeader)?;
    let index: usize = value
        .trim()
        .parse()
        .map_err(|_| RoutingError::UnparsableIndex(value.to_string()))?;
    Ok(catalog.scenario_at(index)?)
}

/// `500` with no entity headers and an empty body; the transport layer adds
/// nothing beyond what it must.
fn bare_server_error() -> Response {
    Response::with_status(StatusCode::INTERNAL_SERVER_ERROR)
}

pub(crate) fn panic_text(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text
    } else {
        "non-string panic payload"
    }
}
