//! In-memory session state shared by the loop, the controller and prompt sources.

use std::collections::BTreeSet;

use crate::core::types::{Discovery, DiscoveryStatus, TestResults, TestStatus};

/// Mutable bookkeeping for one fixloop session.
///
/// `previously_passing` is the regression baseline: every name in it was
/// PASSING at the last point it was observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub test_results: TestResults,
    pub previously_passing: BTreeSet<String>,
    /// Status of the most recent full discovery, `None` before the first one.
    pub last_discovery: Option<DiscoveryStatus>,
    pub iteration_count: u32,
    pub fixes_completed: u32,
    pub attempts_failed: u32,
}

/// Passing/failing/skipped counts over the current results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub passing: usize,
    pub failing: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.passing + self.failing + self.skipped
    }

    /// Passing share of non-skipped tests, in percent.
    pub fn success_rate(&self) -> Option<f64> {
        let considered = self.passing + self.failing;
        if considered == 0 {
            return None;
        }
        Some(self.passing as f64 * 100.0 / considered as f64)
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace results with a fresh discovery.
    ///
    /// A failed discovery carries no information, so the previous results and
    /// baseline are kept. A successful one rebuilds the baseline, which is how
    /// a test that stopped passing leaves it. A test missing from the new
    /// results also leaves the baseline: it can no longer be re-run, so it
    /// cannot be checked for regressions.
    pub fn apply_discovery(&mut self, discovery: Discovery) {
        self.last_discovery = Some(discovery.status.clone());
        if !discovery.is_ok() {
            return;
        }
        self.previously_passing = discovery
            .results
            .values()
            .filter(|outcome| outcome.is_passing())
            .map(|outcome| outcome.name.clone())
            .collect();
        self.test_results = discovery.results;
    }

    /// True when the last discovery succeeded.
    pub fn discovery_ok(&self) -> bool {
        matches!(self.last_discovery, Some(DiscoveryStatus::Ok))
    }

    /// Record a committed fix for `name` ahead of the next discovery.
    pub fn mark_fixed(&mut self, name: &str) {
        if let Some(outcome) = self.test_results.get_mut(name) {
            outcome.status = TestStatus::Passing;
            outcome.output.clear();
        }
        self.previously_passing.insert(name.to_string());
    }

    /// Names of currently failing tests in stable order.
    pub fn failing_tests(&self) -> Vec<&str> {
        self.test_results
            .values()
            .filter(|outcome| outcome.status == TestStatus::Failing)
            .map(|outcome| outcome.name.as_str())
            .collect()
    }

    pub fn has_failing(&self) -> bool {
        self.test_results
            .values()
            .any(|outcome| outcome.status == TestStatus::Failing)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for outcome in self.test_results.values() {
            match outcome.status {
                TestStatus::Passing => counts.passing += 1,
                TestStatus::Failing => counts.failing += 1,
                TestStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }
}
