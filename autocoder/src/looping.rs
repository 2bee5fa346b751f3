//! Multi-session looping for `autocoder run`.

use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::failures::FailureTracker;
use crate::core::ledger::LedgerSummary;
use crate::core::types::{SessionOutcome, SessionReport};
use crate::errors::LedgerError;
use crate::io::process::CancelFlag;

/// Something that can run sessions against one project.
pub trait SessionDriver {
    /// Current ledger summary; `None` while the project has no usable ledger.
    fn progress(&self) -> Result<Option<LedgerSummary>>;
    /// Run exactly one session. `iteration` is 1-indexed within this loop.
    fn run_session(&self, iteration: u32) -> Result<SessionReport>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// `None` runs until done, interrupted or the failure cap trips.
    pub max_iterations: Option<u32>,
    pub max_consecutive_failures: u32,
    /// Pause between sessions.
    pub delay: Duration,
}

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// Every feature in the ledger passes.
    Done,
    /// The operator's iteration cap was reached.
    IterationCap { max_iterations: u32 },
    /// Too many hard failures without ledger progress, back to back.
    FailureCap {
        consecutive: u32,
        last_reason: Option<String>,
    },
    /// The operator interrupted the run.
    Interrupted,
}

impl LoopStop {
    /// True when the loop was aborted rather than finishing normally.
    pub fn is_abort(&self) -> bool {
        matches!(self, LoopStop::FailureCap { .. } | LoopStop::Interrupted)
    }
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub sessions_run: u32,
    pub stop: LoopStop,
    pub last_summary: Option<LedgerSummary>,
}

/// Run sessions until the ledger is done, the iteration cap is reached, the
/// failure cap trips, or `cancel` is raised.
///
/// Session failures are counted, not propagated. Errors that leave the ledger
/// untrustworthy (`LedgerError::is_fatal`) and other driver errors stop the loop.
#[instrument(skip_all, fields(max_iterations = ?config.max_iterations, failure_cap = config.max_consecutive_failures))]
pub fn run_loop<D: SessionDriver, F: FnMut(&SessionReport)>(
    driver: &D,
    config: &LoopConfig,
    cancel: &CancelFlag,
    mut on_session: F,
) -> Result<LoopOutcome> {
    let mut tracker = FailureTracker::new(config.max_consecutive_failures);
    let mut sessions_run = 0u32;
    let mut last_summary = driver.progress()?;

    loop {
        let stop = if cancel.is_cancelled() {
            Some(LoopStop::Interrupted)
        } else if last_summary.as_ref().is_some_and(LedgerSummary::is_done) {
            Some(LoopStop::Done)
        } else if tracker.tripped() {
            Some(LoopStop::FailureCap {
                consecutive: tracker.consecutive(),
                last_reason: tracker.last_reason().map(str::to_string),
            })
        } else {
            config
                .max_iterations
                .filter(|max| sessions_run >= *max)
                .map(|max_iterations| LoopStop::IterationCap { max_iterations })
        };
        if let Some(stop) = stop {
            info!(sessions_run, stop = ?stop, "loop stopped");
            return Ok(LoopOutcome {
                sessions_run,
                stop,
                last_summary,
            });
        }

        if sessions_run > 0 && !cancel.sleep(config.delay) {
            continue;
        }

        let iteration = sessions_run + 1;
        let report = match driver.run_session(iteration) {
            Ok(report) => report,
            Err(err) => {
                if let Some(ledger_err) = err.downcast_ref::<LedgerError>()
                    && ledger_err.is_fatal()
                {
                    warn!(err = %ledger_err, "fatal ledger error, stopping");
                }
                return Err(err);
            }
        };
        sessions_run = iteration;
        tracker.record(&report);
        on_session(&report);

        if report.outcome == SessionOutcome::Interrupted {
            cancel.cancel();
        }
        last_summary = match &report.summary {
            Some(summary) => Some(summary.clone()),
            None => driver.progress()?,
        };
    }
}
