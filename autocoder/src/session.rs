//! Orchestration for a single agent session.
//!
//! One session: classify the project, brief the agent, run it behind the
//! command gate, then re-read the ledger and keep only the changes the
//! append-only rule allows. The agent's own account of what it did is never
//! trusted; progress is whatever the ledger shows afterwards.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::ProjectState;
use crate::core::ledger::{Ledger, LedgerDefect, LedgerSummary, parse_ledger, reconcile};
use crate::core::types::{LedgerMutations, SessionOutcome, SessionReport};
use crate::errors::LedgerError;
use crate::io::config::HarnessConfig;
use crate::io::gate::{CommandGate, PolicyGate, socket_path_for};
use crate::io::git::Git;
use crate::io::inspect::inspect_project;
use crate::io::ledger_store;
use crate::io::process::CancelFlag;
use crate::io::project::ProjectPaths;
use crate::io::prompt::{CodingPromptInputs, InitPromptInputs, PromptBuilder, system_prompt};
use crate::io::runtime::{AgentRuntime, RuntimeReport, RuntimeStatus, SessionRequest};
use crate::io::session_log::{SessionMeta, SessionPaths, next_session_number};
use crate::looping::SessionDriver;

/// Features listed in a coding session's briefing.
const NEXT_FEATURES: usize = 5;
const GIT_LOG_LIMIT: usize = 10;

/// Runs sessions for one project with one runtime.
pub struct SessionOrchestrator<R: AgentRuntime> {
    config: HarnessConfig,
    paths: ProjectPaths,
    gate: PolicyGate,
    runtime: R,
    cancel: CancelFlag,
}

/// Ledger state after the agent finished.
struct Observed {
    mutations: LedgerMutations,
    violations: Vec<String>,
    ledger: Option<Ledger>,
}

impl<R: AgentRuntime> SessionOrchestrator<R> {
    pub fn new(config: HarnessConfig, paths: ProjectPaths, runtime: R, cancel: CancelFlag) -> Self {
        let gate = PolicyGate::new(config.command_policy(), paths.root.clone());
        Self {
            config,
            paths,
            gate,
            runtime,
            cancel,
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Run exactly one bounded session.
    #[instrument(skip_all, fields(iteration, root = %self.paths.root.display()))]
    pub fn run_once(&self, iteration: u32) -> Result<SessionReport> {
        let started = Instant::now();
        let started_at_unix = unix_now();
        let state = inspect_project(&self.paths, self.config.notes_tail_lines)?;
        let kind = state.kind();
        let session = SessionPaths::create(
            self.paths
                .session_dir(next_session_number(&self.paths.sessions_dir)?),
        )?;

        let (instructions, prev, resumed_init) = match &state {
            ProjectState::Initialize => (self.initializer_prompt(None)?, None, false),
            ProjectState::ResumeIncompleteInit { reason } => {
                let destination = self.paths.quarantine_path(started_at_unix);
                ledger_store::quarantine(&self.paths.ledger_path, &destination)?;
                warn!(
                    reason = %reason,
                    moved_to = %destination.display(),
                    "resuming incomplete initialization"
                );
                (self.initializer_prompt(Some(reason))?, None, true)
            }
            ProjectState::Continue {
                ledger,
                summary,
                notes_tail,
            } => {
                let prompt = self.coding_prompt(ledger, summary, notes_tail)?;
                (prompt, Some(ledger.clone()), false)
            }
        };
        session.write_prompt(&instructions)?;
        info!(kind = kind.as_str(), resumed_init, "starting session");

        let request = SessionRequest {
            kind,
            instructions,
            system_prompt: system_prompt().to_string(),
            workdir: self.paths.root.clone(),
            model: self.config.model.clone(),
            timeout: self.config.session_timeout(),
            max_turns: self.config.max_turns,
            transcript_path: session.transcript_path.clone(),
            log_path: session.runtime_log_path.clone(),
            output_limit_bytes: self.config.transcript_limit_bytes,
            gate_socket: socket_path_for(iteration),
            settings_path: self.paths.agent_settings_path.clone(),
        };
        let report = match self.runtime.run(&request, &self.gate, &self.cancel) {
            Ok(report) => report,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "agent runtime failed to run");
                RuntimeReport::with_status(
                    RuntimeStatus::Failed {
                        reason: format!("{err:#}"),
                    },
                    started.elapsed(),
                )
            }
        };
        let outcome = self.outcome_of(&report.status);

        let observed = match &prev {
            None => self.observe_init()?,
            Some(prev) => self.observe_continue(prev)?,
        };
        let summary = observed.ledger.as_ref().map(Ledger::summary);
        let duration = started.elapsed();

        session.write_meta(&SessionMeta {
            iteration,
            kind,
            resumed_init,
            outcome: outcome.clone(),
            started_at_unix,
            duration_ms: duration.as_millis() as u64,
            turns: report.turns,
            cost_usd: report.cost_usd,
            tool_uses: report.tool_uses,
            mutations: observed.mutations.clone(),
            violations: observed.violations.clone(),
            denied_commands: report.denied_commands.clone(),
            summary: summary.clone(),
        })?;

        info!(
            outcome = ?outcome,
            mutations = observed.mutations.count(),
            violations = observed.violations.len(),
            denied = report.denied_commands.len(),
            duration_secs = duration.as_secs(),
            "session finished"
        );
        Ok(SessionReport {
            iteration,
            kind,
            resumed_init,
            outcome,
            mutations: observed.mutations,
            violations: observed.violations,
            denied_commands: report.denied_commands,
            summary,
            duration,
        })
    }

    fn initializer_prompt(&self, resume_reason: Option<&str>) -> Result<String> {
        PromptBuilder::new(self.config.prompt_budget_bytes).build_initializer(&InitPromptInputs {
            project_dir: self.paths.root.display().to_string(),
            allowed_commands: self.allowed_commands(),
            resume_reason: resume_reason.map(str::to_string),
        })
    }

    fn coding_prompt(
        &self,
        ledger: &Ledger,
        summary: &LedgerSummary,
        notes_tail: &[String],
    ) -> Result<String> {
        PromptBuilder::new(self.config.prompt_budget_bytes).build_coding(&CodingPromptInputs {
            project_dir: self.paths.root.display().to_string(),
            allowed_commands: self.allowed_commands(),
            summary: summary.clone(),
            next_features: ledger.next_incomplete(NEXT_FEATURES),
            notes_tail: notes_tail.to_vec(),
            git_log: self.recent_history(),
        })
    }

    fn allowed_commands(&self) -> Vec<String> {
        self.gate
            .policy()
            .allowed_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Recent commits, read only if the gate would let the agent run the same command.
    fn recent_history(&self) -> Option<String> {
        let command = Git::recent_log_command(GIT_LOG_LIMIT);
        if let Some(reason) = self.gate.check(&command).reason() {
            debug!(reason, "git log not permitted, skipping history");
            return None;
        }
        match Git::new(&self.paths.root).recent_log(GIT_LOG_LIMIT) {
            Ok(log) => log,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to read git history");
                None
            }
        }
    }

    fn outcome_of(&self, status: &RuntimeStatus) -> SessionOutcome {
        match status {
            RuntimeStatus::Completed => SessionOutcome::Completed,
            RuntimeStatus::TimedOut => SessionOutcome::TimedOut {
                after_secs: self.config.session_timeout_secs,
            },
            RuntimeStatus::Failed { reason } => SessionOutcome::Failed {
                reason: reason.clone(),
            },
            RuntimeStatus::Interrupted => SessionOutcome::Interrupted,
        }
    }

    /// After an initialization session: whatever complete ledger exists is new.
    ///
    /// A missing or cut-off ledger is not an error here; the next session
    /// classifies it as an incomplete initialization and retries.
    fn observe_init(&self) -> Result<Observed, LedgerError> {
        let path = &self.paths.ledger_path;
        let empty = Observed {
            mutations: LedgerMutations::default(),
            violations: Vec::new(),
            ledger: None,
        };
        let Some(bytes) = ledger_store::read_bytes(path)? else {
            warn!("initialization session wrote no ledger");
            return Ok(empty);
        };
        let written = match parse_ledger(&bytes) {
            Ok(ledger) if ledger.is_empty() => {
                warn!("initialization session wrote an empty ledger");
                return Ok(empty);
            }
            Ok(ledger) => ledger,
            Err(LedgerDefect::Truncated(reason)) => {
                warn!(reason = %reason, "initialization left an incomplete ledger");
                return Ok(empty);
            }
            Err(LedgerDefect::Malformed(reason)) => {
                return Err(LedgerError::CorruptLedger {
                    path: path.clone(),
                    reason,
                });
            }
        };

        let reconciled = reconcile(&Ledger::default(), &written);
        self.report_violations(&reconciled.violations);
        if reconciled.ledger != written {
            ledger_store::save(path, &reconciled.ledger)?;
        }
        Ok(Observed {
            mutations: LedgerMutations {
                created: reconciled.ledger.len(),
                ..LedgerMutations::default()
            },
            violations: reconciled.violations,
            ledger: Some(reconciled.ledger),
        })
    }

    /// After a coding session: apply legal transitions, restore everything else.
    ///
    /// A deleted or cut-off ledger is put back as it was before the session;
    /// well-formed JSON with the wrong structure is left for the operator.
    fn observe_continue(&self, prev: &Ledger) -> Result<Observed, LedgerError> {
        let path = &self.paths.ledger_path;
        let Some(bytes) = ledger_store::read_bytes(path)? else {
            return self.restore(prev, "feature_list.json was deleted; restored".to_string());
        };
        let next = match parse_ledger(&bytes) {
            Ok(next) => next,
            Err(LedgerDefect::Truncated(reason)) => {
                return self.restore(
                    prev,
                    format!("feature_list.json was left incomplete ({reason}); restored"),
                );
            }
            Err(LedgerDefect::Malformed(reason)) => {
                return Err(LedgerError::CorruptLedger {
                    path: path.clone(),
                    reason,
                });
            }
        };

        let reconciled = reconcile(prev, &next);
        self.report_violations(&reconciled.violations);
        if reconciled.ledger != next {
            ledger_store::save(path, &reconciled.ledger)?;
        }
        for name in &reconciled.completed {
            info!(feature = %name, "feature now passes");
        }
        Ok(Observed {
            mutations: LedgerMutations {
                created: 0,
                completed: reconciled.completed,
                appended: reconciled.appended,
            },
            violations: reconciled.violations,
            ledger: Some(reconciled.ledger),
        })
    }

    fn restore(&self, prev: &Ledger, violation: String) -> Result<Observed, LedgerError> {
        let violations = vec![violation];
        self.report_violations(&violations);
        ledger_store::save(&self.paths.ledger_path, prev)?;
        Ok(Observed {
            mutations: LedgerMutations::default(),
            violations,
            ledger: Some(prev.clone()),
        })
    }

    fn report_violations(&self, violations: &[String]) {
        if violations.is_empty() {
            return;
        }
        let err = LedgerError::InvariantViolation {
            violations: violations.to_vec(),
        };
        warn!(err = %err, "rejected ledger changes");
    }
}

impl<R: AgentRuntime> SessionDriver for SessionOrchestrator<R> {
    fn progress(&self) -> Result<Option<LedgerSummary>> {
        let state = inspect_project(&self.paths, 0)?;
        Ok(state.summary().cloned())
    }

    fn run_session(&self, iteration: u32) -> Result<SessionReport> {
        self.run_once(iteration)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
