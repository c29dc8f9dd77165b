//! Autonomous test-fixing loop.
//!
//! An external coding assistant is asked to fix one failing test at a time.
//! Each change is verified (target now passes, nothing that passed before
//! regressed) and then committed, or rolled back with a hard reset.
//!
//! - **[`core`]**: Pure session bookkeeping (outcomes, work items, counters).
//!   No I/O.
//! - **[`io`]**: Subprocess and filesystem adapters (git, test runner,
//!   assistant, config). Each sits behind a trait so tests can script it.
//!
//! [`fix`] runs a single attempt; [`session`] drives attempts until the
//! prompt source runs dry, the iteration cap is hit, or the user interrupts.

pub mod core;
pub mod exit_codes;
pub mod fix;
pub mod generators;
pub mod interrupt;
pub mod io;
pub mod logging;
pub mod report;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
