//! Fixloop configuration, read from `fixloop.toml` at the workspace root.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::fix::DEFAULT_COMMIT_FOOTER;

/// Default config file name, relative to the workspace root.
pub const CONFIG_FILE: &str = "fixloop.toml";

/// What the session does once the prompt source reports no remaining work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IdlePolicy {
    /// End the session.
    #[default]
    Stop,
    /// Sleep the configured delay and look again, until interrupted or capped.
    Poll,
}

/// Fixloop configuration (TOML).
///
/// Every field is optional; command-line flags override file values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FixloopConfig {
    /// Paths handed to the test runner for discovery.
    pub test_paths: Vec<String>,

    /// Pause between iterations, and between idle polls.
    pub delay_secs: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,

    pub idle_policy: IdlePolicy,

    /// Run full discovery after every attempt instead of trusting the
    /// in-memory update until the next idle check.
    pub rediscover_after_attempt: bool,

    pub suite_timeout_secs: u64,
    pub test_timeout_secs: u64,

    /// Bytes of test output kept per run.
    pub output_limit_bytes: usize,

    /// Appended to every commit message after a blank line.
    pub commit_footer: String,

    pub assistant: AssistantConfig,
    pub tests: TestsConfig,
    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AssistantConfig {
    pub program: String,
    /// Arguments placed before the prompt, which is always passed last.
    pub args: Vec<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec![
                "--dangerously-skip-permissions".to_string(),
                "-c".to_string(),
                "-p".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestsConfig {
    /// Test runner program and leading arguments (e.g. `["uv","run","pytest"]`).
    pub command: Vec<String>,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            command: vec!["uv".to_string(), "run".to_string(), "pytest".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// `test-fixer`, `comparator`, `exec:<command>`, or a path to an executable.
    pub kind: String,

    /// Template override for the test fixer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<PathBuf>,

    pub comparator: ComparatorConfig,

    /// Per-call timeout for external generator commands.
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            kind: "test-fixer".to_string(),
            prompt_template: None,
            comparator: ComparatorConfig::default(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ComparatorConfig {
    pub impl1_dir: PathBuf,
    pub impl2_dir: PathBuf,
    pub impl1_language: String,
    pub impl2_language: String,
    pub file_patterns: Vec<String>,
}

impl Default for ComparatorConfig {
    fn default() -> Self {
        Self {
            impl1_dir: PathBuf::from("src"),
            impl2_dir: PathBuf::from("reference"),
            impl1_language: "Python".to_string(),
            impl2_language: "C".to_string(),
            file_patterns: ["*.py", "*.c", "*.h", "*.cpp", "*.hpp"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl Default for FixloopConfig {
    fn default() -> Self {
        Self {
            test_paths: vec!["tests/".to_string()],
            delay_secs: 60,
            max_iterations: None,
            idle_policy: IdlePolicy::Stop,
            rediscover_after_attempt: true,
            suite_timeout_secs: 10 * 60,
            test_timeout_secs: 60,
            output_limit_bytes: 1_000_000,
            commit_footer: DEFAULT_COMMIT_FOOTER.to_string(),
            assistant: AssistantConfig::default(),
            tests: TestsConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl FixloopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.test_paths.is_empty() {
            return Err(anyhow!("test_paths must not be empty"));
        }
        if self.suite_timeout_secs == 0 {
            return Err(anyhow!("suite_timeout_secs must be > 0"));
        }
        if self.test_timeout_secs == 0 {
            return Err(anyhow!("test_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.max_iterations == Some(0) {
            return Err(anyhow!("max_iterations must be > 0 when set"));
        }
        if self.assistant.program.trim().is_empty() {
            return Err(anyhow!("assistant.program must not be empty"));
        }
        if self.tests.command.is_empty() || self.tests.command[0].trim().is_empty() {
            return Err(anyhow!("tests.command must be a non-empty array"));
        }
        if self.generator.kind.trim().is_empty() {
            return Err(anyhow!("generator.kind must not be empty"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.generator.comparator.file_patterns.is_empty() {
            return Err(anyhow!("generator.comparator.file_patterns must not be empty"));
        }
        Ok(())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    pub fn suite_timeout(&self) -> Duration {
        Duration::from_secs(self.suite_timeout_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FixloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<FixloopConfig> {
    if !path.exists() {
        let cfg = FixloopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FixloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FixloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, FixloopConfig::default());
        assert_eq!(cfg.test_paths, vec!["tests/".to_string()]);
        assert_eq!(cfg.idle_policy, IdlePolicy::Stop);
        assert_eq!(cfg.commit_footer, DEFAULT_COMMIT_FOOTER);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join(CONFIG_FILE);
        let cfg = FixloopConfig {
            max_iterations: Some(5),
            idle_policy: IdlePolicy::Poll,
            ..FixloopConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        assert!(!path.with_extension("toml.tmp").exists());
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"
delay_secs = 5
idle_policy = "poll"

[tests]
command = ["pytest"]

[generator.comparator]
impl2_dir = "rust"
"#,
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.delay(), Duration::from_secs(5));
        assert_eq!(cfg.idle_policy, IdlePolicy::Poll);
        assert_eq!(cfg.tests.command, vec!["pytest".to_string()]);
        assert_eq!(cfg.generator.comparator.impl2_dir, PathBuf::from("rust"));
        assert_eq!(cfg.generator.comparator.impl1_dir, PathBuf::from("src"));
        assert_eq!(cfg.assistant, AssistantConfig::default());
    }

    #[test]
    fn rejects_empty_test_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "[tests]\ncommand = []\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("tests.command"));
    }

    #[test]
    fn rejects_zero_iteration_cap() {
        let cfg = FixloopConfig {
            max_iterations: Some(0),
            ..FixloopConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unknown_idle_policy() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "idle_policy = \"forever\"\n").expect("write");
        assert!(load_config(&path).is_err());
    }
}
