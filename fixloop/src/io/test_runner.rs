//! Test runner adapter: full-suite discovery and single-test verification.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use tracing::{debug, info, instrument, warn};

use crate::core::test_path::to_runner_path;
use crate::core::types::{Discovery, DiscoveryStatus, TestOutcome, TestResults};
use crate::io::junit::{parse_junit_xml, parse_verbose_output};
use crate::io::process::run_command_with_timeout;

/// Exit code pytest uses when no tests were collected.
const NO_TESTS_COLLECTED: i32 = 5;

/// Runs tests and reports structured outcomes.
///
/// Neither method fails: problems running the suite become a failed
/// [`Discovery`], and problems running one test become a FAILING outcome.
pub trait TestExecutor {
    fn run_suite(&self, paths: &[String], timeout: Duration) -> Discovery;
    fn run_one(&self, name: &str, timeout: Duration) -> TestOutcome;
}

/// Executor that shells out to a pytest-compatible command.
#[derive(Debug, Clone)]
pub struct PytestExecutor {
    workdir: PathBuf,
    command: Vec<String>,
    output_limit_bytes: usize,
}

impl PytestExecutor {
    /// `command` is the program followed by its leading arguments, e.g.
    /// `["uv", "run", "pytest"]`.
    pub fn new(
        workdir: impl Into<PathBuf>,
        command: Vec<String>,
        output_limit_bytes: usize,
    ) -> Result<Self> {
        ensure!(!command.is_empty(), "test command must not be empty");
        Ok(Self {
            workdir: workdir.into(),
            command,
            output_limit_bytes,
        })
    }

    pub fn program(&self) -> &str {
        &self.command[0]
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]).current_dir(&self.workdir);
        cmd
    }

    fn try_run_suite(&self, paths: &[String], timeout: Duration) -> Result<Discovery> {
        let report_dir = tempfile::tempdir().context("create report dir")?;
        let report_path = report_dir.path().join("report.xml");

        let mut cmd = self.base_command();
        cmd.args(paths)
            .args(["-v", "--tb=short"])
            .arg(format!("--junit-xml={}", report_path.display()));

        let output = run_command_with_timeout(cmd, None, timeout, self.output_limit_bytes)
            .context("run test suite")?;

        if output.timed_out {
            return Ok(Discovery::failed(format!(
                "test suite timed out after {}s",
                timeout.as_secs()
            )));
        }

        if report_path.exists() {
            return Ok(read_report(&report_path));
        }

        debug!("no junit report written, parsing verbose output");
        let results = parse_verbose_output(&output.combined_text());
        if !results.is_empty() {
            return Ok(Discovery::ok(results));
        }
        match output.status.code() {
            Some(0) | Some(NO_TESTS_COLLECTED) => Ok(Discovery::ok(TestResults::new())),
            code => Ok(Discovery::failed(format!(
                "test runner exited with {code:?} and wrote no report"
            ))),
        }
    }
}

fn read_report(path: &Path) -> Discovery {
    let parsed = fs::read_to_string(path)
        .with_context(|| format!("read test report {}", path.display()))
        .and_then(|xml| parse_junit_xml(&xml));
    match parsed {
        Ok(results) => Discovery::ok(results),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "unreadable test report");
            Discovery::failed(format!("unreadable test report: {err:#}"))
        }
    }
}

impl TestExecutor for PytestExecutor {
    #[instrument(skip_all, fields(paths = ?paths, timeout_secs = timeout.as_secs()))]
    fn run_suite(&self, paths: &[String], timeout: Duration) -> Discovery {
        let discovery = match self.try_run_suite(paths, timeout) {
            Ok(discovery) => discovery,
            Err(err) => Discovery::failed(format!("{err:#}")),
        };
        match &discovery.status {
            DiscoveryStatus::Ok => {
                info!(tests = discovery.results.len(), "discovery finished");
            }
            DiscoveryStatus::Failed { reason } => {
                warn!(reason = %reason, "discovery failed");
            }
        }
        discovery
    }

    #[instrument(skip_all, fields(test = name))]
    fn run_one(&self, name: &str, timeout: Duration) -> TestOutcome {
        let path = to_runner_path(name);
        debug!(path = %path, "running single test");
        let mut cmd = self.base_command();
        cmd.arg(&path).args(["-v", "--tb=short"]);

        match run_command_with_timeout(cmd, None, timeout, self.output_limit_bytes) {
            Err(err) => TestOutcome::failing(name, format!("failed to run test: {err:#}")),
            Ok(output) if output.timed_out => {
                warn!(timeout_secs = timeout.as_secs(), "single test timed out");
                TestOutcome::failing(name, format!("timed out after {}s", timeout.as_secs()))
            }
            Ok(output) if output.status.success() => TestOutcome::passing(name),
            Ok(output) => TestOutcome::failing(name, output.combined_text()),
        }
    }
}
