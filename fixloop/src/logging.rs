//! Diagnostic tracing to stderr.
//!
//! Operator output (discovery report, attempt verdicts, summary) goes to
//! stdout from the binary and is unaffected by the filter set here.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// How chatty diagnostics should be when `RUST_LOG` is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Normal,
    /// `-v`
    Verbose,
    /// `-d`: also logs every prompt sent to the assistant.
    Debug,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, debug: bool) -> Self {
        if debug {
            Self::Debug
        } else if verbose {
            Self::Verbose
        } else {
            Self::Normal
        }
    }

    fn default_directive(self) -> &'static str {
        match self {
            Self::Normal => "fixloop=info",
            Self::Verbose => "fixloop=debug",
            Self::Debug => "fixloop=trace",
        }
    }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the filter follows `verbosity`.
///
/// # Example
/// ```bash
/// RUST_LOG=fixloop::io::git=debug fixloop tests/
/// ```
pub fn init(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_directive()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
