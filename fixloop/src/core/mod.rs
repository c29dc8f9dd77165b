//! Deterministic, pure logic shared by the fixloop orchestration.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod session;
pub mod test_path;
pub mod types;
