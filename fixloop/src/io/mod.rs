//! I/O adapters: subprocesses, git, the test runner and configuration.

pub mod assistant;
pub mod config;
pub mod git;
pub mod junit;
pub mod process;
pub mod test_runner;
pub mod workspace;
