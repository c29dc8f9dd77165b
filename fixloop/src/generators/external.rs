//! Prompt source backed by an external program.
//!
//! The program is called once per operation with a verb as its last
//! argument:
//!
//! - `generate`: session state as JSON on stdin; one JSON work item per
//!   stdout line.
//! - `should-continue`: session state on stdin; exit 0 means there is work.
//! - `completed`: `{"item", "success", "state"}` on stdin; output ignored.
//!
//! Failures of any call are logged and treated as "no work", never raised.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, ensure};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::core::session::SessionState;
use crate::core::types::{TestResults, WorkItem};
use crate::generators::PromptSource;
use crate::io::process::{CommandOutput, run_command_with_timeout};

const OUTPUT_LIMIT_BYTES: usize = 4 * 1024 * 1024;

/// Session state as seen by external generators.
#[derive(Debug, Serialize)]
struct StateSnapshot<'a> {
    test_results: &'a TestResults,
    previously_passing: &'a BTreeSet<String>,
    discovery_ok: bool,
    iteration_count: u32,
    fixes_completed: u32,
    attempts_failed: u32,
}

impl<'a> StateSnapshot<'a> {
    fn of(state: &'a SessionState) -> Self {
        Self {
            test_results: &state.test_results,
            previously_passing: &state.previously_passing,
            discovery_ok: state.discovery_ok(),
            iteration_count: state.iteration_count,
            fixes_completed: state.fixes_completed,
            attempts_failed: state.attempts_failed,
        }
    }
}

#[derive(Debug, Serialize)]
struct Completion<'a> {
    item: &'a WorkItem,
    success: bool,
    state: StateSnapshot<'a>,
}

pub struct ExternalGenerator {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
}

impl ExternalGenerator {
    pub fn new(command: Vec<String>, workdir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        ensure!(!command.is_empty(), "external generator command must not be empty");
        Ok(Self {
            command,
            workdir: workdir.into(),
            timeout,
        })
    }

    #[instrument(skip_all, fields(verb = %verb))]
    fn call(&self, verb: &str, input: &impl Serialize) -> Result<CommandOutput> {
        let payload = serde_json::to_vec(input).context("serialize generator input")?;
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .arg(verb)
            .current_dir(&self.workdir);
        let output = run_command_with_timeout(cmd, Some(&payload), self.timeout, OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("run generator {verb}"))?;
        if output.timed_out {
            return Err(anyhow!(
                "generator {verb} timed out after {}s",
                self.timeout.as_secs()
            ));
        }
        debug!(exit_code = ?output.status.code(), "generator call finished");
        Ok(output)
    }

    fn try_generate(&self, state: &SessionState) -> Result<Vec<WorkItem>> {
        let output = self.call("generate", &StateSnapshot::of(state))?;
        if !output.status.success() {
            return Err(anyhow!(
                "generator exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut items = Vec::new();
        for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match serde_json::from_str::<WorkItem>(line) {
                Ok(item) => items.push(item),
                Err(err) => warn!(err = %err, line, "skipping malformed work item"),
            }
        }
        Ok(items)
    }
}

impl PromptSource for ExternalGenerator {
    fn name(&self) -> &str {
        &self.command[0]
    }

    fn generate(&mut self, state: &SessionState) -> Vec<WorkItem> {
        match self.try_generate(state) {
            Ok(items) => items,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "external generate failed");
                Vec::new()
            }
        }
    }

    fn should_continue(&mut self, state: &SessionState) -> bool {
        match self.call("should-continue", &StateSnapshot::of(state)) {
            Ok(output) => output.status.success(),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "external should-continue failed");
                false
            }
        }
    }

    fn on_completed(&mut self, item: &WorkItem, success: bool, state: &SessionState) {
        let completion = Completion {
            item,
            success,
            state: StateSnapshot::of(state),
        };
        match self.call("completed", &completion) {
            Ok(output) if !output.status.success() => {
                warn!(exit_code = ?output.status.code(), "external completed hook failed");
            }
            Ok(_) => {}
            Err(err) => warn!(err = %format!("{err:#}"), "external completed hook failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Discovery, TestOutcome};
    use std::fs;

    /// `sh -c SCRIPT gen VERB`: the verb lands in `$1`.
    fn generator(dir: &std::path::Path, script: &str) -> ExternalGenerator {
        ExternalGenerator::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                script.to_string(),
                "gen".to_string(),
            ],
            dir,
            Duration::from_secs(10),
        )
        .expect("generator")
    }

    fn failing_state() -> SessionState {
        let mut state = SessionState::new();
        let outcome = TestOutcome::failing("tests.test_a::t", "boom");
        state.apply_discovery(Discovery::ok(TestResults::from([(
            outcome.name.clone(),
            outcome,
        )])));
        state
    }

    const SCRIPT: &str = r#"
case "$1" in
  generate)
    cat > state.json
    echo '{"prompt":"do it","description":"first","target":"tests.test_a::t"}'
    echo 'not json'
    echo '{"prompt":"later","description":"second"}'
    ;;
  should-continue)
    [ -f done ] && exit 1
    exit 0
    ;;
  completed)
    cat > completed.json
    touch done
    ;;
esac
"#;

    #[test]
    fn generate_reads_json_lines_and_skips_bad_ones() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut source = generator(temp.path(), SCRIPT);
        let items = source.generate(&failing_state());

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].target.as_deref(), Some("tests.test_a::t"));
        assert_eq!(items[1].target, None);

        let sent: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(temp.path().join("state.json")).expect("read"))
                .expect("json");
        assert_eq!(sent["test_results"]["tests.test_a::t"]["status"], "FAILING");
        assert_eq!(sent["discovery_ok"], true);
    }

    #[test]
    fn completion_feeds_should_continue() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut source = generator(temp.path(), SCRIPT);
        let state = failing_state();
        assert!(source.should_continue(&state));

        let item = WorkItem::new("p", "d").with_context("key", "value");
        source.on_completed(&item, true, &state);

        assert!(!source.should_continue(&state));
        let sent: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(temp.path().join("completed.json")).expect("read"),
        )
        .expect("json");
        assert_eq!(sent["success"], true);
        assert_eq!(sent["item"]["context"]["key"], "value");
    }

    #[test]
    fn failing_generator_yields_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut source = generator(temp.path(), "echo broken >&2; exit 3");
        assert!(source.generate(&failing_state()).is_empty());
        assert!(!source.should_continue(&failing_state()));
        source.on_completed(&WorkItem::new("p", "d"), false, &failing_state());
    }

    #[test]
    fn missing_program_yields_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut source = ExternalGenerator::new(
            vec!["fixloop-definitely-missing-generator".to_string()],
            temp.path(),
            Duration::from_secs(5),
        )
        .expect("generator");
        assert!(source.generate(&SessionState::new()).is_empty());
        assert!(!source.should_continue(&SessionState::new()));
    }
}
