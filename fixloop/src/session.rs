//! The fix loop: discover, pick work, attempt, refresh, repeat.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::session::{SessionState, StatusCounts};
use crate::core::types::WorkItem;
use crate::fix::{AttemptOutcome, FixController, FixSettings};
use crate::generators::PromptSource;
use crate::interrupt::Interrupt;
use crate::io::assistant::AssistantRunner;
use crate::io::config::{FixloopConfig, IdlePolicy};
use crate::io::git::VersionControl;
use crate::io::test_runner::TestExecutor;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub test_paths: Vec<String>,
    pub delay: Duration,
    pub max_iterations: Option<u32>,
    pub idle_policy: IdlePolicy,
    pub rediscover_after_attempt: bool,
    pub suite_timeout: Duration,
}

impl SessionConfig {
    pub fn from_config(cfg: &FixloopConfig) -> Self {
        Self {
            test_paths: cfg.test_paths.clone(),
            delay: cfg.delay(),
            max_iterations: cfg.max_iterations,
            idle_policy: cfg.idle_policy,
            rediscover_after_attempt: cfg.rediscover_after_attempt,
            suite_timeout: cfg.suite_timeout(),
        }
    }
}

/// Settings for the per-attempt controller derived from the same file.
pub fn fix_settings(cfg: &FixloopConfig) -> FixSettings {
    FixSettings {
        test_timeout: cfg.test_timeout(),
        commit_footer: cfg.commit_footer.clone(),
    }
}

/// Reason why `run_session` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStop {
    /// The first discovery found no work for the prompt source.
    NothingToDo,
    /// The prompt source ran dry and the idle policy is `stop`.
    Idle,
    /// The configured iteration cap was reached.
    MaxIterations { max: u32 },
    Interrupted,
}

/// Summary of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub iterations: u32,
    pub fixes_completed: u32,
    pub attempts_failed: u32,
    pub stop: SessionStop,
    /// Test counts from the last known results.
    pub counts: StatusCounts,
}

/// Progress notifications for operator output.
#[derive(Debug)]
pub enum SessionEvent<'a> {
    Discovered { state: &'a SessionState },
    Attempting { iteration: u32, item: &'a WorkItem },
    Attempted { item: &'a WorkItem, outcome: &'a AttemptOutcome },
    Waiting { delay: Duration },
}

/// Drive fix attempts until the work runs out, the cap is hit, or the user
/// interrupts.
///
/// Errors are fatal and come only from git (reading the revision, checking
/// for changes, rolling back).
pub fn run_session<V, T, A, F>(
    controller: &FixController<'_, V, T, A>,
    source: &mut dyn PromptSource,
    config: &SessionConfig,
    interrupt: &Interrupt,
    mut on_event: F,
) -> Result<SessionOutcome>
where
    V: VersionControl,
    T: TestExecutor,
    A: AssistantRunner,
    F: FnMut(SessionEvent<'_>),
{
    let mut state = SessionState::new();
    let finish = |state: &SessionState, stop: SessionStop| {
        info!(stop = ?stop, iterations = state.iteration_count, "session finished");
        SessionOutcome {
            iterations: state.iteration_count,
            fixes_completed: state.fixes_completed,
            attempts_failed: state.attempts_failed,
            stop,
            counts: state.counts(),
        }
    };

    discover(controller.tests(), config, &mut state, &mut on_event);
    if interrupt.is_triggered() {
        return Ok(finish(&state, SessionStop::Interrupted));
    }
    // An unusable discovery proves nothing, so only a successful one may end the session here.
    if state.discovery_ok() && !source.should_continue(&state) {
        return Ok(finish(&state, SessionStop::NothingToDo));
    }

    loop {
        if interrupt.is_triggered() {
            return Ok(finish(&state, SessionStop::Interrupted));
        }
        if let Some(max) = config.max_iterations {
            if state.iteration_count >= max {
                return Ok(finish(&state, SessionStop::MaxIterations { max }));
            }
        }
        state.iteration_count += 1;
        let iteration = state.iteration_count;
        debug!(iteration, "iteration start");

        if !source.should_continue(&state) {
            debug!("no work reported, rediscovering");
            discover(controller.tests(), config, &mut state, &mut on_event);
            if !source.should_continue(&state) {
                if config.idle_policy == IdlePolicy::Stop && state.discovery_ok() {
                    return Ok(finish(&state, SessionStop::Idle));
                }
                if !wait(config.delay, interrupt, &mut on_event) {
                    return Ok(finish(&state, SessionStop::Interrupted));
                }
                continue;
            }
        }

        let Some(item) = source.generate(&state).into_iter().next() else {
            debug!("prompt source produced no items");
            if !wait(config.delay, interrupt, &mut on_event) {
                return Ok(finish(&state, SessionStop::Interrupted));
            }
            continue;
        };

        on_event(SessionEvent::Attempting {
            iteration,
            item: &item,
        });
        let outcome = controller.attempt(&item, &mut state)?;
        let success = outcome.is_committed();
        if success {
            state.fixes_completed += 1;
        } else {
            state.attempts_failed += 1;
        }
        on_event(SessionEvent::Attempted {
            item: &item,
            outcome: &outcome,
        });
        source.on_completed(&item, success, &state);

        if config.rediscover_after_attempt {
            discover(controller.tests(), config, &mut state, &mut on_event);
        }

        if config
            .max_iterations
            .is_some_and(|max| state.iteration_count >= max)
        {
            continue;
        }
        if !wait(config.delay, interrupt, &mut on_event) {
            return Ok(finish(&state, SessionStop::Interrupted));
        }
    }
}

fn discover<T: TestExecutor, F: FnMut(SessionEvent<'_>)>(
    tests: &T,
    config: &SessionConfig,
    state: &mut SessionState,
    on_event: &mut F,
) {
    let discovery = tests.run_suite(&config.test_paths, config.suite_timeout);
    if !discovery.is_ok() {
        warn!("discovery failed, keeping previous results");
    }
    state.apply_discovery(discovery);
    on_event(SessionEvent::Discovered { state: &*state });
}

/// Returns `false` if interrupted while waiting.
fn wait<F: FnMut(SessionEvent<'_>)>(
    delay: Duration,
    interrupt: &Interrupt,
    on_event: &mut F,
) -> bool {
    if delay.is_zero() {
        return !interrupt.is_triggered();
    }
    on_event(SessionEvent::Waiting { delay });
    interrupt.sleep(delay)
}
