//! Consecutive-failure accounting for the run loop.

use crate::core::types::{SessionOutcome, SessionReport};

/// Counts hard failures that made no ledger progress, back to back.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    cap: u32,
    consecutive: u32,
    last_reason: Option<String>,
}

impl FailureTracker {
    pub fn new(cap: u32) -> Self {
        Self {
            cap,
            consecutive: 0,
            last_reason: None,
        }
    }

    /// Fold one session into the counter.
    ///
    /// A session that mutated the ledger resets the count even if it then
    /// failed; forward progress is what the cap protects.
    pub fn record(&mut self, report: &SessionReport) {
        if !report.mutations.is_empty() {
            self.reset();
            return;
        }
        match &report.outcome {
            SessionOutcome::Completed => self.reset(),
            outcome if outcome.is_hard_failure() => {
                self.consecutive += 1;
                self.last_reason = outcome.as_error().map(|err| err.to_string());
            }
            _ => {}
        }
    }

    pub fn tripped(&self) -> bool {
        self.cap > 0 && self.consecutive >= self.cap
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn last_reason(&self) -> Option<&str> {
        self.last_reason.as_deref()
    }

    fn reset(&mut self) {
        self.consecutive = 0;
        self.last_reason = None;
    }
}
