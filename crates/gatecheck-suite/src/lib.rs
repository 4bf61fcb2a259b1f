// Builtin catalog of gateway conformance scenarios. The catalog is built
// once, lives for the process, and is shared read-only between the
// dispatch shim on the server side and the orchestrator on the client
// side.

pub mod fixtures;
mod scenarios;

use gatecheck_harness::Catalog;
use lazy_static::lazy_static;

lazy_static! {
    static ref BUILTIN: Catalog = Catalog::from_scenarios(scenarios::builtin_scenarios());
}

/// The builtin scenario catalog.
///
/// Positional indices double as routing keys, so the order here is part of
/// the wire contract for a run: additions are append-only.
#[must_use]
pub fn builtin() -> &'static Catalog {
    &BUILTIN
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn catalog_builds_once_with_stable_order() {
        let catalog = builtin();
        assert_eq!(catalog.scenario_count(), 22);

        // Spot-check the anchors other tooling keys on.
        assert_eq!(catalog.scenario_at(0).unwrap().name, "query string echo");
        assert_eq!(
            catalog.scenario_at(21).unwrap().name,
            "still serving after faults"
        );
        assert!(catalog.scenario_at(22).is_err());
    }

    #[test]
    fn scenario_names_are_unique() {
        let names: Vec<_> = builtin().iter().map(|s| s.name).collect();
        let unique: HashSet<_> = names.iter().copied().collect();
        assert_eq!(names.len(), unique.len());
    }

    #[test]
    fn repeated_lookups_hand_out_the_same_catalog() {
        assert!(std::ptr::eq(builtin(), builtin()));
    }
}
