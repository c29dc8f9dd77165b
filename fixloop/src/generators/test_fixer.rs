//! Default prompt source: fix one randomly chosen failing test at a time.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::core::session::SessionState;
use crate::core::types::WorkItem;
use crate::generators::PromptSource;

const DEFAULT_TEMPLATE: &str = include_str!("prompts/test_fixer.md");

/// Template picked up from the workspace root when no `--prompt` is given.
pub const PROMPT_FILE: &str = "prompt-fix.md";

/// Read a custom test-fixer template.
///
/// An explicitly named file that does not exist is a warning, not an error;
/// the built-in template is used instead. Without a name, [`PROMPT_FILE`] is
/// used when present.
pub fn resolve_prompt_template(root: &Path, explicit: Option<&Path>) -> Result<Option<String>> {
    let path = root.join(explicit.unwrap_or(Path::new(PROMPT_FILE)));
    if !path.is_file() {
        if explicit.is_some() {
            warn!(path = %path.display(), "prompt file not found, using built-in template");
        }
        return Ok(None);
    }
    let template = fs::read_to_string(&path)
        .with_context(|| format!("read prompt template {}", path.display()))?;
    info!(path = %path.display(), "using custom prompt template");
    Ok(Some(template))
}

/// Picks a failing test uniformly at random and asks for a fix.
///
/// The rendered template sees `test_name` and `test_output`.
pub struct RandomFailingTestFixer {
    env: Environment<'static>,
    template: String,
    rng: StdRng,
}

impl RandomFailingTestFixer {
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
            template: DEFAULT_TEMPLATE.to_string(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Use a custom template. Syntax errors are reported here rather than
    /// at the first render.
    pub fn with_template(template: String) -> Result<Self> {
        Environment::new()
            .template_from_str(&template)
            .context("parse prompt template")?;
        Ok(Self {
            template,
            ..Self::new()
        })
    }

    /// Deterministic selection, for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn render(&self, test_name: &str, test_output: &str) -> Result<String> {
        let rendered = self.env.render_str(
            &self.template,
            context! {
                test_name => test_name,
                test_output => test_output.trim_end(),
            },
        )?;
        Ok(rendered.trim().to_string())
    }
}

impl Default for RandomFailingTestFixer {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptSource for RandomFailingTestFixer {
    fn name(&self) -> &str {
        "test-fixer"
    }

    fn generate(&mut self, state: &SessionState) -> Vec<WorkItem> {
        let failing = state.failing_tests();
        let Some(name) = failing.choose(&mut self.rng).map(|name| name.to_string()) else {
            return Vec::new();
        };
        let output = state
            .test_results
            .get(&name)
            .map(|outcome| outcome.output.as_str())
            .unwrap_or_default();
        debug!(test = %name, candidates = failing.len(), "selected failing test");

        match self.render(&name, output) {
            Ok(prompt) => vec![
                WorkItem::new(prompt, format!("Fix failing test: {name}"))
                    .with_target(name.clone())
                    .with_context("test_name", name)
                    .with_context("generator_type", "test_fixer"),
            ],
            Err(err) => {
                warn!(test = %name, err = %format!("{err:#}"), "render prompt failed");
                Vec::new()
            }
        }
    }

    fn should_continue(&mut self, state: &SessionState) -> bool {
        state.has_failing()
    }

    fn on_completed(&mut self, item: &WorkItem, success: bool, _state: &SessionState) {
        let test = item.target.as_deref().unwrap_or_default();
        if success {
            info!(test, "fixed test");
        } else {
            info!(test, "test still failing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Discovery, TestOutcome, TestResults};
    use std::collections::BTreeSet;

    fn state(outcomes: Vec<TestOutcome>) -> SessionState {
        let results: TestResults = outcomes
            .into_iter()
            .map(|outcome| (outcome.name.clone(), outcome))
            .collect();
        let mut state = SessionState::new();
        state.apply_discovery(Discovery::ok(results));
        state
    }

    #[test]
    fn yields_one_item_targeting_a_failing_test() {
        let state = state(vec![
            TestOutcome::passing("tests.test_a::ok"),
            TestOutcome::failing("tests.test_a::broken", "AssertionError: 1 != 2"),
        ]);
        let mut fixer = RandomFailingTestFixer::new().with_seed(7);

        let items = fixer.generate(&state);

        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.target.as_deref(), Some("tests.test_a::broken"));
        assert_eq!(item.description, "Fix failing test: tests.test_a::broken");
        assert!(item.prompt.contains("Failing test: tests.test_a::broken"));
        assert!(item.prompt.contains("AssertionError: 1 != 2"));
        assert_eq!(item.context["test_name"], "tests.test_a::broken");
    }

    #[test]
    fn nothing_to_do_when_all_pass() {
        let state = state(vec![
            TestOutcome::passing("a"),
            TestOutcome::skipped("b", "later"),
        ]);
        let mut fixer = RandomFailingTestFixer::new();
        assert!(fixer.generate(&state).is_empty());
        assert!(!fixer.should_continue(&state));
    }

    #[test]
    fn selection_covers_every_failing_test() {
        let state = state(vec![
            TestOutcome::failing("a", ""),
            TestOutcome::failing("b", ""),
            TestOutcome::failing("c", ""),
        ]);
        let mut fixer = RandomFailingTestFixer::new().with_seed(42);
        let mut seen = BTreeSet::new();
        for _ in 0..200 {
            let items = fixer.generate(&state);
            seen.insert(items[0].target.clone().expect("target"));
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn custom_template_is_rendered() {
        let state = state(vec![TestOutcome::failing("t::x", "boom")]);
        let mut fixer =
            RandomFailingTestFixer::with_template("fix {{ test_name }}: {{ test_output }}".into())
                .expect("template");
        assert_eq!(fixer.generate(&state)[0].prompt, "fix t::x: boom");
    }

    #[test]
    fn prompt_file_in_root_is_picked_up() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(resolve_prompt_template(temp.path(), None).expect("resolve"), None);

        fs::write(temp.path().join(PROMPT_FILE), "custom {{ test_name }}").expect("write");
        assert_eq!(
            resolve_prompt_template(temp.path(), None).expect("resolve"),
            Some("custom {{ test_name }}".to_string())
        );
    }

    #[test]
    fn missing_named_prompt_falls_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resolved =
            resolve_prompt_template(temp.path(), Some(Path::new("nope.md"))).expect("resolve");
        assert_eq!(resolved, None);
    }
}
