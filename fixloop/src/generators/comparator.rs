//! Prompt source that walks two parallel implementations module by module.
//!
//! Test status is irrelevant here: the source keeps going while there are
//! file pairs whose module it has not handed out yet.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::Pattern;
use minijinja::{Environment, context};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::session::SessionState;
use crate::core::types::WorkItem;
use crate::generators::PromptSource;
use crate::io::config::ComparatorConfig;

const DEFAULT_TEMPLATE: &str = include_str!("prompts/comparator.md");

/// A file in the first implementation and its counterpart in the second.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePair {
    /// File stem shared by both sides.
    pub module: String,
    pub impl1: PathBuf,
    pub impl2: PathBuf,
}

pub struct ImplementationComparator {
    root: PathBuf,
    config: ComparatorConfig,
    patterns: Vec<Pattern>,
    /// Suffixes tried when the second side has no file at the same path.
    suffixes: Vec<String>,
    env: Environment<'static>,
    processed: BTreeSet<String>,
}

impl ImplementationComparator {
    pub fn new(root: &Path, config: &ComparatorConfig) -> Result<Self> {
        let patterns = config
            .file_patterns
            .iter()
            .map(|p| Pattern::new(p).with_context(|| format!("invalid file pattern '{p}'")))
            .collect::<Result<Vec<_>>>()?;
        let suffixes = config
            .file_patterns
            .iter()
            .map(|p| p.replace('*', ""))
            .filter(|s| !s.is_empty())
            .collect();
        Ok(Self {
            root: root.to_path_buf(),
            config: config.clone(),
            patterns,
            suffixes,
            env: Environment::new(),
            processed: BTreeSet::new(),
        })
    }

    /// All comparable pairs, in path order. Paths are relative to the root.
    pub fn find_pairs(&self) -> Vec<FilePair> {
        let dir1 = self.root.join(&self.config.impl1_dir);
        let dir2 = self.root.join(&self.config.impl2_dir);
        if !dir1.is_dir() || !dir2.is_dir() {
            debug!(impl1 = %dir1.display(), impl2 = %dir2.display(), "implementation dirs missing");
            return Vec::new();
        }

        let mut pairs = Vec::new();
        for entry in WalkDir::new(&dir1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            if !self.patterns.iter().any(|p| p.matches(&file_name)) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&dir1) else {
                continue;
            };
            let Some(counterpart) = self.counterpart(&dir2, relative) else {
                continue;
            };
            let module = relative
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            pairs.push(FilePair {
                module,
                impl1: self.config.impl1_dir.join(relative),
                impl2: counterpart,
            });
        }
        pairs
    }

    /// Same relative path first, then the same stem with any pattern suffix.
    fn counterpart(&self, dir2: &Path, relative: &Path) -> Option<PathBuf> {
        if dir2.join(relative).is_file() {
            return Some(self.config.impl2_dir.join(relative));
        }
        let stem = relative.file_stem()?.to_string_lossy();
        let parent = relative.parent().unwrap_or(Path::new(""));
        self.suffixes
            .iter()
            .map(|suffix| parent.join(format!("{stem}{suffix}")))
            .find(|candidate| dir2.join(candidate).is_file())
            .map(|candidate| self.config.impl2_dir.join(candidate))
    }

    fn render(&self, pair: &FilePair) -> Result<String> {
        let rendered = self.env.render_str(
            DEFAULT_TEMPLATE,
            context! {
                module_name => &pair.module,
                impl1_language => &self.config.impl1_language,
                impl2_language => &self.config.impl2_language,
                impl1_path => pair.impl1.display().to_string(),
                impl2_path => pair.impl2.display().to_string(),
            },
        )?;
        Ok(rendered.trim().to_string())
    }
}

impl PromptSource for ImplementationComparator {
    fn name(&self) -> &str {
        "comparator"
    }

    /// Hands out the first unprocessed module and marks it processed.
    fn generate(&mut self, _state: &SessionState) -> Vec<WorkItem> {
        let Some(pair) = self
            .find_pairs()
            .into_iter()
            .find(|pair| !self.processed.contains(&pair.module))
        else {
            return Vec::new();
        };
        self.processed.insert(pair.module.clone());

        let prompt = match self.render(&pair) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(module = %pair.module, err = %format!("{err:#}"), "render prompt failed");
                return Vec::new();
            }
        };
        let description = format!(
            "Compare implementations: {} ({} vs {})",
            pair.module, self.config.impl1_language, self.config.impl2_language
        );
        vec![
            WorkItem::new(prompt, description)
                .with_context("module_name", pair.module.clone())
                .with_context("impl1_file", pair.impl1.display().to_string())
                .with_context("impl2_file", pair.impl2.display().to_string())
                .with_context("generator_type", "implementation_comparator"),
        ]
    }

    fn should_continue(&mut self, _state: &SessionState) -> bool {
        self.find_pairs()
            .iter()
            .any(|pair| !self.processed.contains(&pair.module))
    }

    fn on_completed(&mut self, item: &WorkItem, success: bool, _state: &SessionState) {
        let module = item
            .context
            .get("module_name")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if success {
            info!(module, "implementations compared");
        } else {
            info!(module, "comparison made no accepted change");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, "").expect("write");
    }

    fn config() -> ComparatorConfig {
        ComparatorConfig {
            impl1_dir: PathBuf::from("py"),
            impl2_dir: PathBuf::from("c"),
            impl1_language: "Python".to_string(),
            impl2_language: "C".to_string(),
            file_patterns: vec!["*.py".to_string(), "*.c".to_string()],
        }
    }

    #[test]
    fn pairs_by_path_then_by_stem() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch(temp.path(), "py/lexer.py");
        touch(temp.path(), "c/lexer.c");
        touch(temp.path(), "py/sub/emit.py");
        touch(temp.path(), "c/sub/emit.py");
        touch(temp.path(), "py/orphan.py");
        touch(temp.path(), "py/notes.txt");
        touch(temp.path(), "c/notes.txt");

        let comparator = ImplementationComparator::new(temp.path(), &config()).expect("new");
        let pairs = comparator.find_pairs();

        assert_eq!(
            pairs,
            vec![
                FilePair {
                    module: "lexer".to_string(),
                    impl1: PathBuf::from("py/lexer.py"),
                    impl2: PathBuf::from("c/lexer.c"),
                },
                FilePair {
                    module: "emit".to_string(),
                    impl1: PathBuf::from("py/sub/emit.py"),
                    impl2: PathBuf::from("c/sub/emit.py"),
                },
            ]
        );
    }

    #[test]
    fn hands_out_each_module_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch(temp.path(), "py/a.py");
        touch(temp.path(), "c/a.c");
        touch(temp.path(), "py/b.py");
        touch(temp.path(), "c/b.c");
        let state = SessionState::new();
        let mut comparator = ImplementationComparator::new(temp.path(), &config()).expect("new");

        assert!(comparator.should_continue(&state));
        let first = comparator.generate(&state);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].target, None);
        assert_eq!(first[0].description, "Compare implementations: a (Python vs C)");
        assert!(first[0].prompt.contains("Python implementation: py/a.py"));
        assert!(first[0].prompt.contains("C implementation: c/a.c"));

        let second = comparator.generate(&state);
        assert_eq!(second[0].context["module_name"], "b");
        assert!(!comparator.should_continue(&state));
        assert!(comparator.generate(&state).is_empty());
    }

    #[test]
    fn missing_directories_mean_no_work() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut comparator = ImplementationComparator::new(temp.path(), &config()).expect("new");
        assert!(!comparator.should_continue(&SessionState::new()));
    }

    #[test]
    fn rejects_invalid_pattern() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = ComparatorConfig {
            file_patterns: vec!["[".to_string()],
            ..config()
        };
        assert!(ImplementationComparator::new(temp.path(), &cfg).is_err());
    }
}
