//! Deterministic, pure logic shared by the harness.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod failures;
pub mod ledger;
pub mod policy;
pub mod shell;
pub mod transcript;
pub mod types;
