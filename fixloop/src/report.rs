//! Operator-facing text printed to stdout by the binary.
//!
//! Kept separate from tracing: these lines are the product output and are
//! shown regardless of `RUST_LOG`.

use std::fmt::Write;

use crate::core::session::{SessionState, StatusCounts};
use crate::core::types::{DiscoveryStatus, WorkItem};
use crate::fix::AttemptOutcome;
use crate::session::{SessionConfig, SessionEvent, SessionOutcome, SessionStop};

const RULE: &str = "============================================================";

pub fn banner(source: &str, config: &SessionConfig) -> String {
    let max = config
        .max_iterations
        .map_or_else(|| "unlimited".to_string(), |max| max.to_string());
    format!(
        "{RULE}\nfixloop: generator {source}, paths {}, max iterations {max}, delay {}s\n{RULE}",
        config.test_paths.join(" "),
        config.delay.as_secs()
    )
}

/// Counts plus the failing tests, or the reason discovery failed.
pub fn discovery_report(state: &SessionState) -> String {
    let mut out = String::new();
    if let Some(DiscoveryStatus::Failed { reason }) = &state.last_discovery {
        let _ = writeln!(out, "discovery failed: {reason}");
        if state.test_results.is_empty() {
            return out.trim_end().to_string();
        }
        out.push_str("last known results:\n");
    }
    out.push_str(&counts_line(&state.counts()));
    for name in state.failing_tests() {
        let _ = write!(out, "\n  FAILING {name}");
    }
    out
}

pub fn attempt_started(iteration: u32, item: &WorkItem) -> String {
    format!("[{iteration}] {}", item.description)
}

pub fn attempt_finished(item: &WorkItem, outcome: &AttemptOutcome) -> String {
    match outcome {
        AttemptOutcome::Committed { revision } => {
            let short = revision.get(..12).unwrap_or(revision.as_str());
            format!("  committed {short}: {}", item.description)
        }
        AttemptOutcome::Failed {
            failure,
            rolled_back: true,
        } => format!("  failed, rolled back: {failure}"),
        AttemptOutcome::Failed { failure, .. } => format!("  failed: {failure}"),
    }
}

pub fn summary(outcome: &SessionOutcome) -> String {
    let stop = match &outcome.stop {
        SessionStop::NothingToDo => "nothing to do".to_string(),
        SessionStop::Idle => "no work left".to_string(),
        SessionStop::MaxIterations { max } => format!("reached {max} iterations"),
        SessionStop::Interrupted => "interrupted".to_string(),
    };
    let mut out = format!("{RULE}\nsession finished: {stop}\n");
    let _ = writeln!(
        out,
        "iterations: {}, fixes committed: {}, attempts failed: {}",
        outcome.iterations, outcome.fixes_completed, outcome.attempts_failed
    );
    out.push_str(&counts_line(&outcome.counts));
    let _ = write!(out, "\n{RULE}");
    out
}

/// Print a session event to stdout.
pub fn print_event(event: SessionEvent<'_>) {
    match event {
        SessionEvent::Discovered { state } => println!("{}", discovery_report(state)),
        SessionEvent::Attempting { iteration, item } => {
            println!("{}", attempt_started(iteration, item));
        }
        SessionEvent::Attempted { item, outcome } => {
            println!("{}", attempt_finished(item, outcome));
        }
        SessionEvent::Waiting { delay } => println!("waiting {}s", delay.as_secs()),
    }
}

fn counts_line(counts: &StatusCounts) -> String {
    let rate = counts
        .success_rate()
        .map_or_else(|| "n/a".to_string(), |rate| format!("{rate:.1}%"));
    format!(
        "tests: {} passing, {} failing, {} skipped (success rate {rate})",
        counts.passing, counts.failing, counts.skipped
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Discovery, TestOutcome, TestResults};
    use crate::fix::AttemptFailure;

    fn state_with(outcomes: Vec<TestOutcome>) -> SessionState {
        let mut state = SessionState::new();
        state.apply_discovery(Discovery::ok(
            outcomes
                .into_iter()
                .map(|o| (o.name.clone(), o))
                .collect::<TestResults>(),
        ));
        state
    }

    #[test]
    fn discovery_report_lists_failing_tests() {
        let state = state_with(vec![
            TestOutcome::passing("tests/test_a.py::t1"),
            TestOutcome::failing("tests/test_a.py::t2", "boom"),
            TestOutcome::skipped("tests/test_a.py::t3", ""),
        ]);
        assert_eq!(
            discovery_report(&state),
            "tests: 1 passing, 1 failing, 1 skipped (success rate 50.0%)\n  FAILING tests/test_a.py::t2"
        );
    }

    #[test]
    fn failed_discovery_shows_reason() {
        let mut state = SessionState::new();
        state.apply_discovery(Discovery::failed("timed out"));
        assert_eq!(discovery_report(&state), "discovery failed: timed out");
    }

    #[test]
    fn attempt_verdicts() {
        let item = WorkItem::new("p", "Fix failing test: t");
        let committed = AttemptOutcome::Committed {
            revision: "0123456789abcdef".to_string(),
        };
        assert_eq!(
            attempt_finished(&item, &committed),
            "  committed 0123456789ab: Fix failing test: t"
        );
        let failed = AttemptOutcome::Failed {
            failure: AttemptFailure::Regression {
                tests: vec!["a".to_string(), "b".to_string()],
            },
            rolled_back: true,
        };
        assert_eq!(
            attempt_finished(&item, &failed),
            "  failed, rolled back: previously passing tests regressed: a, b"
        );
    }

    #[test]
    fn summary_without_tests_has_no_rate() {
        let outcome = SessionOutcome {
            iterations: 3,
            fixes_completed: 1,
            attempts_failed: 2,
            stop: SessionStop::MaxIterations { max: 3 },
            counts: StatusCounts::default(),
        };
        let text = summary(&outcome);
        assert!(text.contains("session finished: reached 3 iterations"));
        assert!(text.contains("iterations: 3, fixes committed: 1, attempts failed: 2"));
        assert!(text.contains("success rate n/a"));
    }
}
