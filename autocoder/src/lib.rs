//! Session-continuation harness for long-running autonomous coding agents.
//!
//! An agent builds an application over many bounded sessions. Progress lives
//! in `feature_list.json`, which the first session creates and every later
//! session may only advance. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (command validation, ledger rules,
//!   classification, failure accounting). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, process execution,
//!   the command gate socket). Isolated to enable scripted runtimes in tests.
//!
//! Orchestration modules ([`session`], [`looping`], [`status`]) coordinate core
//! logic with I/O to implement CLI commands.

pub mod core;
pub mod errors;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod session;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
