//! Speculation over sequential integer ID spaces.
//!
//! Some targets expose records by sequential ID without an enumerable index.
//! The engine enqueues every ID in a definite range unconditionally, then
//! probes past the end until it has seen enough consecutive absences.
//! Each speculator keeps an independent failure counter.

use std::collections::HashMap;

use tracing::debug;

use crate::request::Request;
use crate::scraper::{Registry, SpeculatorSpec};

/// Per-run consumer overrides for one speculator.
#[derive(Debug, Clone, Default)]
pub struct SpeculationOverrides {
    /// Fetch every ID in this closed range unconditionally, ignoring
    /// failure counts.
    pub definite_range: Option<(u64, u64)>,
    /// Consecutive post-range failures tolerated before stopping. `None`
    /// falls back to the speculator's largest observed gap; zero stops at
    /// the first post-range failure.
    pub plus: Option<u64>,
}

struct SpeculatorState {
    spec: SpeculatorSpec,
    range_start: u64,
    range_end: u64,
    tolerance: u64,
    /// Next un-issued ID.
    next_id: u64,
    consecutive_failures: u64,
    stopped: bool,
}

impl SpeculatorState {
    fn new(spec: SpeculatorSpec, overrides: Option<&SpeculationOverrides>) -> Self {
        let (range_start, range_end) = overrides
            .and_then(|o| o.definite_range)
            .unwrap_or((1, spec.highest_observed));
        let tolerance = overrides
            .and_then(|o| o.plus)
            .unwrap_or(spec.largest_observed_gap);
        Self {
            spec,
            range_start,
            range_end,
            tolerance,
            next_id: range_start,
            consecutive_failures: 0,
            stopped: false,
        }
    }

    /// Whether another probe past the definite range may be issued.
    ///
    /// A tolerance of zero still allows the single probe at `range_end + 1`;
    /// "stop at the first post-range failure" implies that probe happens.
    fn may_extend(&self) -> bool {
        !self.stopped && self.consecutive_failures < self.tolerance.max(1)
    }

    fn issue(&mut self) -> Request {
        let request = self.spec.probe(self.next_id);
        self.next_id += 1;
        request
    }
}

/// Drives every declared speculator through its ID range.
pub struct SpeculationEngine {
    states: HashMap<String, SpeculatorState>,
}

impl SpeculationEngine {
    /// Build states for every speculator the registry declares.
    pub fn for_registry(
        registry: &Registry,
        overrides: &HashMap<String, SpeculationOverrides>,
    ) -> Self {
        let states = registry
            .list_speculators()
            .iter()
            .map(|spec| {
                (
                    spec.name.clone(),
                    SpeculatorState::new(spec.clone(), overrides.get(&spec.name)),
                )
            })
            .collect();
        Self { states }
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Seed requests: every definite-range ID plus the first post-range
    /// probe for each speculator.
    pub fn seed(&mut self) -> Vec<Request> {
        let mut requests = Vec::new();
        let mut names: Vec<&String> = self.states.keys().collect();
        names.sort();
        let names: Vec<String> = names.into_iter().cloned().collect();
        for name in names {
            let state = self.states.get_mut(&name).expect("state exists");
            while state.next_id <= state.range_end {
                requests.push(state.issue());
            }
            if state.may_extend() {
                requests.push(state.issue());
            }
            debug!(
                speculator = %name,
                range_start = state.range_start,
                range_end = state.range_end,
                tolerance = state.tolerance,
                "seeded speculator"
            );
        }
        requests
    }

    /// Record the outcome of one speculative request.
    ///
    /// Outcomes inside the definite range never touch the failure counter.
    /// A post-range success resets it; a post-range failure (including a
    /// deduplication skip) increments it. Returns the next probe while the
    /// counter stays under tolerance.
    pub fn record(&mut self, speculator: &str, id: u64, success: bool) -> Option<Request> {
        let state = self.states.get_mut(speculator)?;
        if id <= state.range_end {
            return None;
        }

        if success {
            state.consecutive_failures = 0;
        } else {
            state.consecutive_failures += 1;
        }

        if state.may_extend() {
            Some(state.issue())
        } else {
            if !state.stopped {
                state.stopped = true;
                debug!(
                    speculator = %speculator,
                    last_issued = state.next_id - 1,
                    "speculator exhausted its failure budget"
                );
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::{Registry, SpeculatorSpec};

    fn registry_with(spec: SpeculatorSpec) -> Registry {
        let mut registry = Registry::new("test");
        registry.add_speculator(spec);
        registry
    }

    fn case_speculator() -> SpeculatorSpec {
        SpeculatorSpec::new("case_ids", |id| {
            Request::get(format!("https://example.com/case/{id}"))
                .continuation("parse_case")
                .build()
        })
        .highest_observed(3)
        .largest_observed_gap(2)
    }

    fn ids(requests: &[Request]) -> Vec<u64> {
        requests.iter().filter_map(|r| r.speculative_id()).collect()
    }

    #[test]
    fn test_seed_covers_range_plus_first_probe() {
        let registry = registry_with(case_speculator());
        let mut engine = SpeculationEngine::for_registry(&registry, &HashMap::new());
        assert_eq!(ids(&engine.seed()), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_gap_tolerance_walks_past_absent_ids() {
        // Server has IDs 1, 2, 3, 5; gap tolerance 2.
        let registry = registry_with(case_speculator());
        let mut engine = SpeculationEngine::for_registry(&registry, &HashMap::new());
        let mut issued = ids(&engine.seed());

        let exists = |id: u64| matches!(id, 1..=3 | 5);
        let mut cursor = 0;
        while cursor < issued.len() {
            let id = issued[cursor];
            if let Some(next) = engine.record("case_ids", id, exists(id)) {
                issued.push(next.speculative_id().unwrap());
            }
            cursor += 1;
        }

        assert_eq!(issued, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_in_range_outcomes_do_not_extend() {
        let registry = registry_with(case_speculator());
        let mut engine = SpeculationEngine::for_registry(&registry, &HashMap::new());
        engine.seed();
        assert!(engine.record("case_ids", 1, true).is_none());
        assert!(engine.record("case_ids", 2, false).is_none());
    }

    #[test]
    fn test_plus_zero_stops_at_first_post_range_failure() {
        let registry = registry_with(case_speculator());
        let overrides = HashMap::from([(
            "case_ids".to_string(),
            SpeculationOverrides {
                definite_range: None,
                plus: Some(0),
            },
        )]);
        let mut engine = SpeculationEngine::for_registry(&registry, &overrides);
        assert_eq!(ids(&engine.seed()), vec![1, 2, 3, 4]);
        assert!(engine.record("case_ids", 4, false).is_none());
    }

    #[test]
    fn test_definite_range_override() {
        let registry = registry_with(case_speculator());
        let overrides = HashMap::from([(
            "case_ids".to_string(),
            SpeculationOverrides {
                definite_range: Some((10, 12)),
                plus: Some(1),
            },
        )]);
        let mut engine = SpeculationEngine::for_registry(&registry, &overrides);
        assert_eq!(ids(&engine.seed()), vec![10, 11, 12, 13]);
    }

    #[test]
    fn test_termination_on_all_failures() {
        let registry = registry_with(case_speculator());
        let mut engine = SpeculationEngine::for_registry(&registry, &HashMap::new());
        let mut issued = ids(&engine.seed());

        let mut cursor = 0;
        while cursor < issued.len() {
            let id = issued[cursor];
            if let Some(next) = engine.record("case_ids", id, false) {
                issued.push(next.speculative_id().unwrap());
            }
            cursor += 1;
        }

        // Range 1..=3 plus probes 4 and 5 (two tolerated failures).
        assert_eq!(issued, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_speculators_have_independent_counters() {
        let mut registry = Registry::new("test");
        registry.add_speculator(case_speculator());
        registry.add_speculator(
            SpeculatorSpec::new("opinion_ids", |id| {
                Request::get(format!("https://example.com/opinion/{id}"))
                    .continuation("parse_opinion")
                    .build()
            })
            .highest_observed(1)
            .largest_observed_gap(1),
        );

        let mut engine = SpeculationEngine::for_registry(&registry, &HashMap::new());
        engine.seed();

        assert!(engine.record("case_ids", 4, false).is_some());
        // opinion_ids counter is untouched by case_ids failures.
        assert!(engine.record("opinion_ids", 2, false).is_none());
    }
}
