//! Shared deterministic types for harness core logic.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::ledger::LedgerSummary;
use crate::errors::SessionError;

/// Which instruction set a session runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// First session: creates the ledger and the project scaffold.
    Init,
    /// Any later session: advances incomplete features.
    Continue,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::Init => "init",
            SessionKind::Continue => "continue",
        }
    }
}

/// How one agent session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    TimedOut { after_secs: u64 },
    Failed { reason: String },
    Interrupted,
}

impl SessionOutcome {
    /// Hard failures are the outcomes that count toward the consecutive-failure cap.
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            SessionOutcome::TimedOut { .. } | SessionOutcome::Failed { .. }
        )
    }

    pub fn as_error(&self) -> Option<SessionError> {
        match self {
            SessionOutcome::Completed => None,
            SessionOutcome::TimedOut { after_secs } => Some(SessionError::Timeout {
                after: Duration::from_secs(*after_secs),
            }),
            SessionOutcome::Failed { reason } => Some(SessionError::RuntimeFailure {
                reason: reason.clone(),
            }),
            SessionOutcome::Interrupted => Some(SessionError::Interrupted),
        }
    }
}

/// A shell command the gate refused during a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeniedCommand {
    pub command: String,
    pub reason: String,
}

/// Ledger changes observed by re-reading the ledger after a session.
///
/// Lists are recorded in ledger order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMutations {
    /// Records written by an initialization session.
    pub created: usize,
    /// Features moved from `passes=false` to `passes=true`.
    pub completed: Vec<String>,
    /// Records appended after the existing ones.
    pub appended: Vec<String>,
}

impl LedgerMutations {
    pub fn count(&self) -> usize {
        self.created + self.completed.len() + self.appended.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

/// Everything the run loop learns from one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    /// Iteration number (1-indexed).
    pub iteration: u32,
    pub kind: SessionKind,
    /// True when a previous initialization left a truncated ledger behind.
    pub resumed_init: bool,
    pub outcome: SessionOutcome,
    pub mutations: LedgerMutations,
    /// Rejected ledger changes (append-only / monotonic rule).
    pub violations: Vec<String>,
    pub denied_commands: Vec<DeniedCommand>,
    /// Ledger summary after the session, if a valid ledger exists.
    pub summary: Option<LedgerSummary>,
    pub duration: Duration,
}
