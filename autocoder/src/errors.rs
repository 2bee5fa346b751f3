//! Typed errors that callers match on.
//!
//! Orchestration code returns `anyhow::Result` and downcasts to these when it
//! has to tell a fatal condition apart from a recoverable one:
//! - `LedgerError`: progress-ledger integrity and persistence failures
//! - `SessionError`: outcomes of one agent session that count toward the failure cap
//! - `LockError`: a second harness process tried to drive the same project

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger exists but fails structural validation. Never auto-repaired.
    #[error("corrupt ledger {path}: {reason}")]
    CorruptLedger { path: PathBuf, reason: String },

    #[error("ledger {path} already exists (refusing to overwrite existing progress)")]
    AlreadyExists { path: PathBuf },

    #[error("ledger {path} does not exist")]
    Missing { path: PathBuf },

    #[error("unknown feature '{name}'")]
    UnknownFeature { name: String },

    #[error("ledger invariant violated: {}", violations.join("; "))]
    InvariantViolation { violations: Vec<String> },

    #[error("ledger io on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LedgerError {
    /// True for errors that must stop the run loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::CorruptLedger { .. } | LedgerError::Io { .. })
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session timed out after {}s", after.as_secs())]
    Timeout { after: Duration },

    #[error("agent runtime failed: {reason}")]
    RuntimeFailure { reason: String },

    #[error("session interrupted by operator")]
    Interrupted,
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("project is locked by another session ({path}, holder pid {})", holder.map(|pid| pid.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    Held { path: PathBuf, holder: Option<u32> },

    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
