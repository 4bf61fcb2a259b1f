// Scenario and catalog types. A catalog is built once, stays immutable and
// order-preserving for the life of a run, and hands out scenarios by their
// positional index, which doubles as the wire-level routing key.

use core::fmt;
use std::future::Future;
use std::sync::Arc;

use derive_more::From;
use futures::future::BoxFuture;
use gatecheck_core::types;
use gatecheck_core::{Environ, Response};

use crate::driver::ScenarioClient;

/// Client half of a scenario: sends requests through the supplied
/// [`ScenarioClient`] and asserts on what comes back.
pub type ClientRoutine =
    Box<dyn Fn(ScenarioClient) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Server half of a scenario: a pure function of the request-context
/// mapping (plus read-only fixtures) producing the response tuple.
pub type ScenarioHandler = Arc<dyn Fn(&mut Environ) -> types::Result<Response> + Send + Sync>;

/// One named request-behavior/response-expectation pair.
pub struct Scenario {
    /// Unique within a catalog; diagnostics only.
    pub name: &'static str,
    pub client: ClientRoutine,
    pub handler: ScenarioHandler,
}

impl Scenario {
    pub fn new<C, Fut, H>(name: &'static str, client: C, handler: H) -> Self
    where
        C: Fn(ScenarioClient) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
        H: Fn(&mut Environ) -> types::Result<Response> + Send + Sync + 'static,
    {
        Self {
            name,
            client: Box::new(move |sender| Box::pin(client(sender))),
            handler: Arc::new(handler),
        }
    }
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario").field("name", &self.name).finish()
    }
}

#[derive(Debug, From)]
pub enum CatalogError {
    #[from(ignore)]
    OutOfRange { index: usize, count: usize },
}

impl std::error::Error for CatalogError {}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::OutOfRange { index, count } => {
                write!(f, "scenario index {index} out of range (catalog holds {count})")
            }
        }
    }
}

/// Ordered, immutable scenario list.
pub struct Catalog {
    scenarios: Vec<Scenario>,
}

impl Catalog {
    #[must_use]
    pub fn from_scenarios(scenarios: Vec<Scenario>) -> Self {
        Self { scenarios }
    }

    #[must_use]
    pub fn scenario_count(&self) -> usize {
        self.scenarios.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Scenario at `index`, bounds-checked; an invalid index is an error,
    /// never a fallback to another scenario.
    pub fn scenario_at(&self, index: usize) -> Result<&Scenario, CatalogError> {
        self.scenarios.get(index).ok_or(CatalogError::OutOfRange {
            index,
            count: self.scenarios.len(),
        })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Scenario> {
        self.scenarios.iter()
    }
}

impl<'c> IntoIterator for &'c Catalog {
    type Item = &'c Scenario;
    type IntoIter = std::slice::Iter<'c, Scenario>;

    fn into_iter(self) -> Self::IntoIter {
        self.scenarios.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatecheck_core::Response;

    fn noop_scenario(name: &'static str) -> Scenario {
        Scenario::new(
            name,
            |_client| async { Ok(()) },
            |_environ| Ok(Response::text("noop")),
        )
    }

    #[test]
    fn scenario_at_is_bounds_checked() {
        let catalog = Catalog::from_scenarios(vec![noop_scenario("a"), noop_scenario("b")]);

        assert_eq!(catalog.scenario_count(), 2);
        assert_eq!(catalog.scenario_at(1).unwrap().name, "b");

        let err = catalog.scenario_at(2).unwrap_err();
        assert!(matches!(err, CatalogError::OutOfRange { index: 2, count: 2 }));
    }

    #[test]
    fn iteration_preserves_catalog_order() {
        let catalog = Catalog::from_scenarios(vec![
            noop_scenario("first"),
            noop_scenario("second"),
            noop_scenario("third"),
        ]);

        let names: Vec<_> = catalog.iter().map(|s| s.name).collect();
        assert_eq!(names, ["first", "second", "third"]);
    }
}
