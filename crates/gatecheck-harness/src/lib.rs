// Conformance harness for gateway server bindings. One catalog of
// request/assertion scenarios is replayable against any server that
// satisfies the `ServerFactory` seam: the harness installs a dispatch
// callback, boots the server in its own execution context, and drives the
// client half of every scenario against it over real loopback sockets.

pub mod dispatch;
pub mod driver;
pub mod runner;
pub mod scenario;

pub use dispatch::{application, RoutingError, SCENARIO_HEADER};
pub use driver::{send, CapturedResponse, DriverError, RequestSpec, ScenarioClient};
pub use runner::{Harness, HarnessError, RunReport, ScenarioOutcome, ServerFactory};
pub use scenario::{Catalog, CatalogError, Scenario};
