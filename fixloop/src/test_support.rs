//! Test-only helpers: temporary git repositories and scripted collaborators.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::types::{Discovery, TestOutcome, TestResults};
use crate::io::assistant::AssistantRunner;
use crate::io::git::Git;
use crate::io::process::LineSink;
use crate::io::test_runner::TestExecutor;
use crate::io::workspace::Workspace;

/// A throwaway git repository with one initial commit (`README.md` = "hi\n").
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp repo dir")?;
        let repo = Self { dir };
        repo.git_cmd(&["init", "-q"])?;
        repo.git_cmd(&["config", "user.email", "test@example.com"])?;
        repo.git_cmd(&["config", "user.name", "test"])?;
        repo.git_cmd(&["config", "commit.gpgsign", "false"])?;
        repo.write("README.md", "hi\n")?;
        repo.commit_all("chore: init")?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self) -> Git {
        Git::new(self.path())
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::new(self.path())
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        write_file(self.path(), rel, contents)
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        let path = self.path().join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Stage everything and commit it.
    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git_cmd(&["add", "-A"])?;
        self.git_cmd(&["commit", "-q", "-m", message])
    }

    /// Number of commits reachable from HEAD.
    pub fn commit_count(&self) -> Result<usize> {
        let out = self.git_output(&["rev-list", "--count", "HEAD"])?;
        out.trim().parse().context("parse commit count")
    }

    fn git_cmd(&self, args: &[&str]) -> Result<()> {
        self.git_output(args).map(|_| ())
    }

    fn git_output(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

fn write_file(root: &Path, rel: &str, contents: &str) -> Result<()> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
}

/// In-memory sink for streamed process output.
#[derive(Clone, Default)]
pub struct CapturedOutput {
    buf: Arc<Mutex<Vec<u8>>>,
}

struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let mut buf = self
            .0
            .lock()
            .map_err(|_| std::io::Error::other("captured output poisoned"))?;
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> LineSink {
        Arc::new(Mutex::new(Box::new(SharedBuf(self.buf.clone()))))
    }

    pub fn text(&self) -> String {
        match self.buf.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).to_string(),
            Err(_) => String::new(),
        }
    }
}

/// One scripted assistant run: files to write, then the exit result.
#[derive(Debug, Clone)]
pub struct ScriptedEdit {
    pub writes: Vec<(String, String)>,
    pub success: bool,
}

impl ScriptedEdit {
    /// Write the given `(path, contents)` pairs and exit successfully.
    pub fn writes(files: &[(&str, &str)]) -> Self {
        Self {
            writes: files
                .iter()
                .map(|(path, contents)| (path.to_string(), contents.to_string()))
                .collect(),
            success: true,
        }
    }

    /// Exit successfully without touching the tree.
    pub fn no_change() -> Self {
        Self::writes(&[])
    }

    /// Exit with failure without touching the tree.
    pub fn failure() -> Self {
        Self {
            writes: Vec::new(),
            success: false,
        }
    }
}

/// Assistant that replays queued edits against a working tree.
pub struct ScriptedAssistant {
    root: PathBuf,
    queue: RefCell<VecDeque<ScriptedEdit>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedAssistant {
    pub fn new(root: &Path, edits: Vec<ScriptedEdit>) -> Self {
        Self {
            root: root.to_path_buf(),
            queue: RefCell::new(edits.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Prompts received so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn assert_drained(&self) -> Result<()> {
        let remaining = self.queue.borrow().len();
        if remaining > 0 {
            return Err(anyhow!("scripted assistant has {remaining} unused edits"));
        }
        Ok(())
    }
}

impl AssistantRunner for ScriptedAssistant {
    fn invoke(&self, prompt: &str) -> bool {
        self.prompts.borrow_mut().push(prompt.to_string());
        let Some(edit) = self.queue.borrow_mut().pop_front() else {
            panic!("unexpected assistant invocation: {prompt}");
        };
        for (path, contents) in &edit.writes {
            if let Err(err) = write_file(&self.root, path, contents) {
                panic!("scripted edit failed: {err:#}");
            }
        }
        edit.success
    }
}

/// Test executor backed by marker files in the working tree.
///
/// A test passes iff `status/<name>` contains `pass`, so scripted assistant
/// edits and git resets change outcomes the same way real code changes would.
pub struct FileBackedTests {
    root: PathBuf,
    names: Vec<String>,
    single_runs: RefCell<Vec<String>>,
}

impl FileBackedTests {
    pub fn new(root: &Path, names: &[&str]) -> Self {
        Self {
            root: root.to_path_buf(),
            names: names.iter().map(|name| name.to_string()).collect(),
            single_runs: RefCell::new(Vec::new()),
        }
    }

    /// Marker path for `name`, relative to the root.
    pub fn status_path(name: &str) -> String {
        let file: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("status/{file}")
    }

    /// Names passed to `run_one`, in order.
    pub fn single_runs(&self) -> Vec<String> {
        self.single_runs.borrow().clone()
    }

    fn outcome(&self, name: &str) -> TestOutcome {
        let marker = self.root.join(Self::status_path(name));
        match fs::read_to_string(marker) {
            Ok(contents) if contents.trim() == "pass" => TestOutcome::passing(name),
            Ok(contents) => TestOutcome::failing(name, format!("AssertionError: {}", contents.trim())),
            Err(_) => TestOutcome::failing(name, "status marker missing"),
        }
    }
}

impl TestExecutor for FileBackedTests {
    fn run_suite(&self, _paths: &[String], _timeout: Duration) -> Discovery {
        let results: TestResults = self
            .names
            .iter()
            .map(|name| (name.clone(), self.outcome(name)))
            .collect();
        Discovery::ok(results)
    }

    fn run_one(&self, name: &str, _timeout: Duration) -> TestOutcome {
        self.single_runs.borrow_mut().push(name.to_string());
        self.outcome(name)
    }
}
