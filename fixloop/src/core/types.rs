//! Shared deterministic types for fixloop core logic.
//!
//! These types define the contracts between the test executor, the prompt
//! sources and the fix controller. They carry no I/O handles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a single test as reported by the test runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Passing,
    Failing,
    Skipped,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passing => "PASSING",
            TestStatus::Failing => "FAILING",
            TestStatus::Skipped => "SKIPPED",
        }
    }
}

/// Result of one test, keyed by its fully qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub status: TestStatus,
    /// Diagnostic text; empty when passing.
    pub output: String,
}

impl TestOutcome {
    pub fn passing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::Passing,
            output: String::new(),
        }
    }

    pub fn failing(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::Failing,
            output: output.into(),
        }
    }

    pub fn skipped(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::Skipped,
            output: output.into(),
        }
    }

    pub fn is_passing(&self) -> bool {
        self.status == TestStatus::Passing
    }
}

/// Outcome mapping produced by a suite run.
pub type TestResults = BTreeMap<String, TestOutcome>;

/// Whether a discovery run produced usable information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryStatus {
    Ok,
    /// Timeout, unreadable report, or runner failure. `results` is empty and
    /// carries no information about the suite.
    Failed { reason: String },
}

/// Full-suite discovery result.
///
/// An empty `results` map with `DiscoveryStatus::Ok` means the suite matched
/// zero tests; with `Failed` it means nothing is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub status: DiscoveryStatus,
    pub results: TestResults,
}

impl Discovery {
    pub fn ok(results: TestResults) -> Self {
        Self {
            status: DiscoveryStatus::Ok,
            results,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: DiscoveryStatus::Failed {
                reason: reason.into(),
            },
            results: TestResults::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == DiscoveryStatus::Ok
    }
}

/// A unit of work for the assistant, produced by a prompt source.
///
/// `context` is opaque correlation data owned by the producing source. The
/// controller only reads `prompt`, `description` and `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub prompt: String,
    pub description: String,
    /// Test that must pass after the attempt, when the source names one.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

impl WorkItem {
    pub fn new(prompt: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            description: description.into(),
            target: None,
            context: BTreeMap::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}
