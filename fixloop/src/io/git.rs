//! Git adapter for snapshot, commit and rollback of the working tree.
//!
//! Every attempt is all-or-nothing: the controller records the starting
//! revision, then either commits the assistant's edits or hard-resets to it.
//! We keep a small, explicit wrapper around `git` subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Failure of the version-control tool.
///
/// Every kind of failure (repository missing, revision unknown, nothing to
/// commit) is this one type; callers tell them apart by message only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("git {operation} failed: {message}")]
pub struct VcsError {
    pub operation: String,
    pub message: String,
}

impl VcsError {
    fn new(operation: &str, message: impl Into<String>) -> Self {
        Self {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

/// Snapshot/restore primitive over the tracked source tree.
///
/// All methods mutate or inspect the one shared working tree; errors are
/// always [`VcsError`] wrapped in `anyhow::Error`.
pub trait VersionControl {
    /// Full id of the current revision.
    fn current_revision(&self) -> Result<String>;
    /// True if anything differs from the last revision (modified, staged or untracked).
    fn has_uncommitted_changes(&self) -> Result<bool>;
    /// Stage everything and commit. Fails when there is nothing to commit.
    fn commit(&self, message: &str) -> Result<()>;
    /// Discard tracked modifications and commits back to `revision`.
    /// Untracked files are left in place.
    fn reset_hard(&self, revision: &str) -> Result<()>;
}

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture("status", &["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Ensure the worktree is fully clean (including untracked files).
    #[instrument(skip_all)]
    pub fn ensure_clean(&self) -> Result<()> {
        let entries = self.status_porcelain()?;
        if entries.is_empty() {
            debug!("worktree is clean");
            return Ok(());
        }
        warn!(changed = entries.len(), "worktree not clean");
        let mut msg = String::new();
        msg.push_str("working tree not clean (commit or stash before running):\n");
        for entry in entries {
            msg.push_str(&format!("{} {}\n", entry.code, entry.path));
        }
        Err(VcsError::new("status", msg.trim_end()).into())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked("add", &["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run_capture("diff", &["diff", "--cached", "--name-only"])?;
        Ok(!out.trim().is_empty())
    }

    /// Full message of the most recent commit.
    pub fn last_commit_message(&self) -> Result<String> {
        let out = self.run_capture("log", &["log", "-1", "--format=%B"])?;
        Ok(out.trim().to_string())
    }

    fn run_capture(&self, operation: &str, args: &[&str]) -> Result<String> {
        let output = self.run_checked(operation, args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, operation: &str, args: &[&str]) -> Result<Output> {
        let output = self.run(operation, args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VcsError::new(
                operation,
                format!("git {}: {}", args.join(" "), stderr.trim()),
            )
            .into());
        }
        Ok(output)
    }

    fn run(&self, operation: &str, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .map_err(|err| VcsError::new(operation, format!("spawn git: {err}")).into())
    }
}

impl VersionControl for Git {
    fn current_revision(&self) -> Result<String> {
        let out = self.run_capture("rev-parse", &["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    fn has_uncommitted_changes(&self) -> Result<bool> {
        Ok(!self.status_porcelain()?.is_empty())
    }

    #[instrument(skip_all)]
    fn commit(&self, message: &str) -> Result<()> {
        self.add_all()?;
        if !self.has_staged_changes()? {
            debug!("no staged changes after add");
            return Err(VcsError::new("commit", "nothing to commit").into());
        }
        self.run_checked("commit", &["commit", "-m", message])?;
        debug!("committed staged changes");
        Ok(())
    }

    #[instrument(skip_all, fields(revision = %revision))]
    fn reset_hard(&self, revision: &str) -> Result<()> {
        debug!(revision, "hard reset");
        self.run_checked("reset", &["reset", "--hard", revision])?;
        Ok(())
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(VcsError::new("status", format!("unexpected porcelain line: '{line}'")).into());
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;
    use std::fs;

    fn vcs_error(err: &anyhow::Error) -> &VcsError {
        err.downcast_ref::<VcsError>().expect("VcsError")
    }

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn current_revision_is_full_hash() {
        let repo = TestRepo::new().expect("repo");
        let rev = repo.git().current_revision().expect("rev");
        assert_eq!(rev.len(), 40);
        assert!(rev.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn current_revision_outside_repository_is_vcs_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = Git::new(temp.path()).current_revision().unwrap_err();
        assert_eq!(vcs_error(&err).operation, "rev-parse");
    }

    #[test]
    fn detects_staged_modified_and_untracked_changes() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        assert!(!git.has_uncommitted_changes().expect("status"));

        repo.write("new.txt", "untracked\n").expect("write");
        assert!(git.has_uncommitted_changes().expect("status"));
        git.add_all().expect("add");
        assert!(git.has_uncommitted_changes().expect("status"));
    }

    #[test]
    fn no_op_commit_fails_and_keeps_revision() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        let before = git.current_revision().expect("rev");

        let err = git.commit("fix: nothing").unwrap_err();
        assert_eq!(vcs_error(&err).message, "nothing to commit");
        assert_eq!(git.current_revision().expect("rev"), before);
    }

    #[test]
    fn commit_records_message_and_advances_revision() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        let before = git.current_revision().expect("rev");

        repo.write("src/lib.py", "x = 1\n").expect("write");
        git.commit("fix: resolve failing test a").expect("commit");

        assert_ne!(git.current_revision().expect("rev"), before);
        assert_eq!(
            git.last_commit_message().expect("log"),
            "fix: resolve failing test a"
        );
        assert!(!git.has_uncommitted_changes().expect("status"));
    }

    #[test]
    fn reset_restores_tracked_files_and_keeps_untracked() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        let start = git.current_revision().expect("rev");

        repo.write("README.md", "changed\n").expect("write");
        repo.write("scratch.txt", "left behind\n").expect("write");
        git.reset_hard(&start).expect("reset");

        assert_eq!(repo.read("README.md").expect("read"), "hi\n");
        assert!(repo.path().join("scratch.txt").exists());
        assert_eq!(git.current_revision().expect("rev"), start);
    }

    #[test]
    fn reset_discards_commits_made_after_start() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        let start = git.current_revision().expect("rev");

        repo.write("README.md", "committed change\n").expect("write");
        git.commit("wip").expect("commit");
        git.reset_hard(&start).expect("reset");

        assert_eq!(git.current_revision().expect("rev"), start);
        assert_eq!(fs::read_to_string(repo.path().join("README.md")).expect("read"), "hi\n");
    }

    #[test]
    fn reset_to_unknown_revision_is_vcs_error() {
        let repo = TestRepo::new().expect("repo");
        let err = repo.git().reset_hard("not-a-revision").unwrap_err();
        assert_eq!(vcs_error(&err).operation, "reset");
    }

    #[test]
    fn ensure_clean_lists_offending_paths() {
        let repo = TestRepo::new().expect("repo");
        repo.git().ensure_clean().expect("clean");
        repo.write("dirty.txt", "x").expect("write");
        let err = repo.git().ensure_clean().unwrap_err();
        assert!(err.to_string().contains("dirty.txt"));
    }
}
