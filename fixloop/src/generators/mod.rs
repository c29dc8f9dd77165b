//! Prompt sources: where work items come from.
//!
//! A [`PromptSource`] is resolved once at startup from the `--generator` value by
//! [`GeneratorSpec::parse`]. The built-in sources are compiled in; anything
//! else runs as an external process speaking a small JSON protocol.

pub mod comparator;
pub mod external;
pub mod test_fixer;

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::debug;

use crate::core::session::SessionState;
use crate::core::types::WorkItem;
use crate::io::config::GeneratorConfig;
use crate::io::workspace::Workspace;

pub use comparator::ImplementationComparator;
pub use external::ExternalGenerator;
pub use test_fixer::RandomFailingTestFixer;

/// Producer of work items for the fix loop.
///
/// Only the first item returned by `generate` is attempted per iteration.
pub trait PromptSource {
    /// Short identifier for logs and banners.
    fn name(&self) -> &str;

    fn generate(&mut self, state: &SessionState) -> Vec<WorkItem>;

    /// Whether this source still has work to hand out.
    fn should_continue(&mut self, state: &SessionState) -> bool;

    /// Advisory completion callback. Implementations log their own failures.
    fn on_completed(&mut self, item: &WorkItem, success: bool, state: &SessionState);
}

/// A resolved `--generator` / `generator.kind` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorSpec {
    TestFixer,
    Comparator,
    /// Program and leading arguments of an external generator.
    External(Vec<String>),
}

impl GeneratorSpec {
    /// Resolve `spec` against the workspace `root`.
    ///
    /// Accepts `test-fixer` (or `default`), `comparator`, `exec:<command>`,
    /// or the path of an existing executable file.
    pub fn parse(spec: &str, root: &Path) -> Result<Self> {
        let spec = spec.trim();
        match spec {
            "test-fixer" | "default" => return Ok(Self::TestFixer),
            "comparator" => return Ok(Self::Comparator),
            _ => {}
        }
        if let Some(command) = spec.strip_prefix("exec:") {
            let command: Vec<String> = command.split_whitespace().map(str::to_string).collect();
            if command.is_empty() {
                bail!("generator 'exec:' needs a command");
            }
            return Ok(Self::External(command));
        }
        let path = root.join(spec);
        if path.is_file() {
            return Ok(Self::External(vec![path.display().to_string()]));
        }
        bail!(
            "unknown generator '{spec}' (expected test-fixer, comparator, exec:<command>, or a path to an executable)"
        )
    }
}

/// Instantiate the source named by `spec`.
///
/// `fixer_template` overrides the built-in test-fixer template.
pub fn build_generator(
    spec: &GeneratorSpec,
    workspace: &Workspace,
    config: &GeneratorConfig,
    fixer_template: Option<String>,
) -> Result<Box<dyn PromptSource>> {
    debug!(spec = ?spec, "building prompt source");
    let source: Box<dyn PromptSource> = match spec {
        GeneratorSpec::TestFixer => match fixer_template {
            Some(template) => Box::new(RandomFailingTestFixer::with_template(template)?),
            None => Box::new(RandomFailingTestFixer::new()),
        },
        GeneratorSpec::Comparator => Box::new(ImplementationComparator::new(
            workspace.root(),
            &config.comparator,
        )?),
        GeneratorSpec::External(command) => Box::new(ExternalGenerator::new(
            command.clone(),
            workspace.root(),
            Duration::from_secs(config.timeout_secs),
        )?),
    };
    Ok(source)
}
