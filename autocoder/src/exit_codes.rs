//! Stable exit codes for autocoder CLI commands.

/// Command succeeded: the ledger is done, the iteration cap was reached, or a command was allowed.
pub const OK: i32 = 0;
/// Invalid arguments/config, corrupt ledger, or other fatal errors.
pub const INVALID: i32 = 1;
/// `autocoder run` stopped because the consecutive-failure cap tripped.
pub const FAILURE_CAP: i32 = 3;
/// Another process holds the project lock.
pub const LOCKED: i32 = 4;
/// `autocoder check-command` denied the command.
pub const DENIED: i32 = 5;
/// The operator interrupted the run (128 + SIGINT).
pub const INTERRUPTED: i32 = 130;
