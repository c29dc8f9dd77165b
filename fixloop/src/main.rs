//! Autonomous test-fixing loop.
//!
//! Runs the test suite, hands one failing test at a time to a coding
//! assistant, and commits the result only when the target passes and nothing
//! that passed before broke. Anything else is hard-reset away.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use fixloop::core::session::SessionState;
use fixloop::exit_codes;
use fixloop::fix::FixController;
use fixloop::generators::test_fixer::resolve_prompt_template;
use fixloop::generators::{GeneratorSpec, build_generator};
use fixloop::interrupt::Interrupt;
use fixloop::io::assistant::CommandAssistant;
use fixloop::io::config::{CONFIG_FILE, FixloopConfig, IdlePolicy, load_config, write_config};
use fixloop::io::git::VersionControl;
use fixloop::io::process::ensure_spawnable;
use fixloop::io::test_runner::{PytestExecutor, TestExecutor};
use fixloop::io::workspace::Workspace;
use fixloop::logging::{self, Verbosity};
use fixloop::report;
use fixloop::session::{SessionConfig, fix_settings, run_session};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "fixloop",
    version,
    about = "Let a coding assistant fix failing tests, one verified commit at a time"
)]
struct Cli {
    /// Test paths to discover (default from config, `tests/`).
    paths: Vec<String>,

    /// Config file (default `fixloop.toml` in the current directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Custom test-fixer prompt template (default `prompt-fix.md` if present).
    #[arg(long)]
    prompt: Option<PathBuf>,

    /// Prompt source: `test-fixer`, `comparator`, `exec:<command>`, or a path
    /// to an executable.
    #[arg(long)]
    generator: Option<String>,

    #[arg(long)]
    max_iterations: Option<u32>,

    /// Seconds to wait between iterations.
    #[arg(long)]
    delay: Option<u64>,

    /// What to do when there is no work left.
    #[arg(long, value_enum)]
    idle: Option<IdlePolicy>,

    /// Trust the in-memory update after an attempt instead of rerunning the suite.
    #[arg(long)]
    no_rediscover: bool,

    /// Run discovery, print the report, and exit.
    #[arg(long)]
    dry_run: bool,

    /// Write the effective configuration to the config path and exit.
    #[arg(long)]
    init_config: bool,

    #[arg(short, long)]
    verbose: bool,

    /// Trace everything, including prompts sent to the assistant.
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    /// Command-line flags win over file values.
    fn apply_overrides(&self, config: &mut FixloopConfig) {
        if !self.paths.is_empty() {
            config.test_paths = self.paths.clone();
        }
        if let Some(prompt) = &self.prompt {
            config.generator.prompt_template = Some(prompt.clone());
        }
        if let Some(generator) = &self.generator {
            config.generator.kind = generator.clone();
        }
        if let Some(max) = self.max_iterations {
            config.max_iterations = Some(max);
        }
        if let Some(delay) = self.delay {
            config.delay_secs = delay;
        }
        if let Some(idle) = self.idle {
            config.idle_policy = idle;
        }
        if self.no_rediscover {
            config.rediscover_after_attempt = false;
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(Verbosity::from_flags(cli.verbose, cli.debug));
    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::FATAL);
        }
    }
}

fn run(cli: &Cli) -> Result<i32> {
    let workspace = Workspace::open(Path::new("."))?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| workspace.join(CONFIG_FILE));
    let mut config = load_config(&config_path)?;
    cli.apply_overrides(&mut config);
    config.validate().context("invalid command-line overrides")?;

    if cli.init_config {
        if config_path.exists() {
            bail!("{} already exists", config_path.display());
        }
        write_config(&config_path, &config)?;
        println!("wrote {}", config_path.display());
        return Ok(exit_codes::OK);
    }

    let git = workspace.git();
    git.current_revision()
        .context("fixloop must run inside a git repository with at least one commit")?;
    let tests = PytestExecutor::new(
        workspace.root(),
        config.tests.command.clone(),
        config.output_limit_bytes,
    )?;
    ensure_spawnable(tests.program(), workspace.root()).context("test command")?;
    let spec = GeneratorSpec::parse(&config.generator.kind, workspace.root())?;
    let session_config = SessionConfig::from_config(&config);

    if cli.dry_run {
        return dry_run(&tests, &session_config);
    }

    git.ensure_clean()?;
    ensure_spawnable(&config.assistant.program, workspace.root()).context("assistant")?;
    let template =
        resolve_prompt_template(workspace.root(), config.generator.prompt_template.as_deref())?;
    let mut source = build_generator(&spec, &workspace, &config.generator, template)?;

    let interrupt = Interrupt::install()?;
    let assistant = CommandAssistant::new(
        workspace.root(),
        config.assistant.program.clone(),
        config.assistant.args.clone(),
        interrupt.clone(),
    );
    let controller = FixController::new(&git, &tests, &assistant, fix_settings(&config));

    println!("{}", report::banner(source.name(), &session_config));
    info!(root = %workspace.root().display(), "session starting");
    match run_session(
        &controller,
        source.as_mut(),
        &session_config,
        &interrupt,
        report::print_event,
    ) {
        Ok(outcome) => {
            println!("{}", report::summary(&outcome));
            Ok(exit_codes::OK)
        }
        Err(err) => {
            error!(err = %format!("{err:#}"), "session aborted");
            eprintln!("fatal: {err:#}");
            eprintln!("the working tree may be mid-attempt; check `git status` before rerunning");
            Ok(exit_codes::FATAL)
        }
    }
}

fn dry_run<T: TestExecutor>(tests: &T, config: &SessionConfig) -> Result<i32> {
    let mut state = SessionState::new();
    state.apply_discovery(tests.run_suite(&config.test_paths, config.suite_timeout));
    println!("{}", report::discovery_report(&state));
    Ok(exit_codes::OK)
}
