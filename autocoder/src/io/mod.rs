//! I/O helpers for harness commands.

pub mod auth;
pub mod config;
pub mod gate;
pub mod git;
pub mod inspect;
pub mod ledger_store;
pub mod lock;
pub mod process;
pub mod project;
pub mod prompt;
pub mod runtime;
pub mod session_log;
