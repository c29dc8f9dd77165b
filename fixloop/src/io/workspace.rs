//! Handle for the working tree shared by git, the test runner and the assistant.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::io::git::Git;

/// The single on-disk checkout every fixloop component operates on.
///
/// Components receive their working directory from this handle instead of
/// relying on the process's current directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `root` to an absolute path.
    pub fn open(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("resolve workspace {}", root.display()))?;
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    pub fn git(&self) -> Git {
        Git::new(&self.root)
    }
}
