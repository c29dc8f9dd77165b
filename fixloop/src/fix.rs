//! One fix attempt: run the assistant, verify, then commit or roll back.
//!
//! ```text
//! start ─ assistant ran ─ change detected ─ target verified ─ no regression ─ committed
//!              │                 │                 │                 │             │
//!           failed            no diff         reset to R0       reset to R0   reset to R0
//! ```
//!
//! The attempt starts at revision `R0`. Any failure after a change exists
//! hard-resets to `R0`, so the assistant's edits land all together or not
//! at all. Failures are returned as [`AttemptOutcome::Failed`]; only errors
//! from git itself escape as `Err`.

use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::session::SessionState;
use crate::core::types::{TestStatus, WorkItem};
use crate::io::assistant::AssistantRunner;
use crate::io::git::VersionControl;
use crate::io::test_runner::TestExecutor;

/// Footer used when no `commit_footer` is configured.
pub const DEFAULT_COMMIT_FOOTER: &str = "Generated with fixloop";

/// Protocol step an attempt reached or failed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStage {
    AssistantRan,
    ChangeDetected,
    TargetVerified,
    NoRegression,
    Committed,
}

/// Expected, recoverable reasons an attempt did not produce a commit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptFailure {
    #[error("assistant did not complete successfully")]
    AssistantFailed,
    #[error("assistant made no changes")]
    NoChange,
    #[error("target test {test} still failing")]
    TargetStillFailing { test: String, output: String },
    #[error("previously passing tests regressed: {}", .tests.join(", "))]
    Regression { tests: Vec<String> },
    #[error("commit rejected: {message}")]
    CommitRejected { message: String },
}

impl AttemptFailure {
    /// The step whose check failed.
    pub fn stage(&self) -> AttemptStage {
        match self {
            Self::AssistantFailed => AttemptStage::AssistantRan,
            Self::NoChange => AttemptStage::ChangeDetected,
            Self::TargetStillFailing { .. } => AttemptStage::TargetVerified,
            Self::Regression { .. } => AttemptStage::NoRegression,
            Self::CommitRejected { .. } => AttemptStage::Committed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Committed {
        revision: String,
    },
    Failed {
        failure: AttemptFailure,
        /// The tree was hard-reset to the starting revision.
        rolled_back: bool,
    },
}

impl AttemptOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct FixSettings {
    /// Timeout for each single-test verification run.
    pub test_timeout: Duration,
    /// Appended to commit messages after a blank line; empty for none.
    pub commit_footer: String,
}

impl Default for FixSettings {
    fn default() -> Self {
        Self {
            test_timeout: Duration::from_secs(60),
            commit_footer: DEFAULT_COMMIT_FOOTER.to_string(),
        }
    }
}

/// Drives single fix attempts against a shared working tree.
pub struct FixController<'a, V, T, A> {
    vcs: &'a V,
    tests: &'a T,
    assistant: &'a A,
    settings: FixSettings,
}

impl<'a, V: VersionControl, T: TestExecutor, A: AssistantRunner> FixController<'a, V, T, A> {
    pub fn new(vcs: &'a V, tests: &'a T, assistant: &'a A, settings: FixSettings) -> Self {
        Self {
            vcs,
            tests,
            assistant,
            settings,
        }
    }

    pub fn tests(&self) -> &T {
        self.tests
    }

    /// Attempt `item` once.
    ///
    /// On commit, the target (if any) is marked PASSING in `state` and joins
    /// the regression baseline. On failure `state` is left untouched.
    #[instrument(skip_all, fields(item = %item.description))]
    pub fn attempt(&self, item: &WorkItem, state: &mut SessionState) -> Result<AttemptOutcome> {
        let start = self.vcs.current_revision()?;
        info!(start = %short(&start), "starting attempt");

        if !self.assistant.invoke(&item.prompt) {
            return Ok(self.fail(AttemptFailure::AssistantFailed, false));
        }

        if !self.vcs.has_uncommitted_changes()? {
            return Ok(self.fail(AttemptFailure::NoChange, false));
        }
        debug!("change detected");

        if let Some(target) = &item.target {
            let outcome = self.tests.run_one(target, self.settings.test_timeout);
            if !outcome.is_passing() {
                self.rollback(&start)?;
                return Ok(self.fail(
                    AttemptFailure::TargetStillFailing {
                        test: target.clone(),
                        output: outcome.output,
                    },
                    true,
                ));
            }
            debug!(target = %target, "target verified");
        } else {
            debug!("no target named, skipping target verification");
        }

        let regressions = self.find_regressions(state);
        if !regressions.is_empty() {
            self.rollback(&start)?;
            return Ok(self.fail(AttemptFailure::Regression { tests: regressions }, true));
        }
        debug!(checked = state.previously_passing.len(), "no regressions");

        let message = self.commit_message(item);
        if let Err(err) = self.vcs.commit(&message) {
            let message = format!("{err:#}");
            self.rollback(&start)?;
            return Ok(self.fail(AttemptFailure::CommitRejected { message }, true));
        }
        let revision = self.vcs.current_revision()?;

        if let Some(target) = &item.target {
            state.mark_fixed(target);
        }
        info!(revision = %short(&revision), "attempt committed");
        Ok(AttemptOutcome::Committed { revision })
    }

    /// Every baseline test, re-run individually; returns those now failing.
    fn find_regressions(&self, state: &SessionState) -> Vec<String> {
        state
            .previously_passing
            .iter()
            .filter(|name| {
                let outcome = self.tests.run_one(name, self.settings.test_timeout);
                if outcome.status == TestStatus::Failing {
                    warn!(test = %name, "regression");
                    true
                } else {
                    false
                }
            })
            .cloned()
            .collect()
    }

    fn commit_message(&self, item: &WorkItem) -> String {
        let subject = match &item.target {
            Some(target) => format!("fix: resolve failing test {target}"),
            None => format!("fix: {}", item.description),
        };
        let footer = self.settings.commit_footer.trim();
        if footer.is_empty() {
            subject
        } else {
            format!("{subject}\n\n{footer}")
        }
    }

    fn rollback(&self, start: &str) -> Result<()> {
        warn!(start = %short(start), "rolling back attempt");
        self.vcs
            .reset_hard(start)
            .with_context(|| format!("roll back to {}", short(start)))
    }

    fn fail(&self, failure: AttemptFailure, rolled_back: bool) -> AttemptOutcome {
        warn!(stage = ?failure.stage(), rolled_back, "attempt failed: {failure}");
        AttemptOutcome::Failed {
            failure,
            rolled_back,
        }
    }
}

fn short(revision: &str) -> &str {
    revision.get(..12).unwrap_or(revision)
}
