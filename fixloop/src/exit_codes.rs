//! Stable exit codes for the fixloop CLI.

/// Session finished, dry run completed, or the user interrupted.
pub const OK: i32 = 0;
/// Startup failed (bad config, not a git repo, dirty tree, missing tools) or
/// git failed mid-session and the tree may need manual inspection.
pub const FATAL: i32 = 1;
