//! Test-only helpers: ledger builders, scripted runtimes and scripted loop drivers.

use std::collections::VecDeque;
use std::fs;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::Map;

use crate::core::ledger::{Feature, Ledger, LedgerSummary};
use crate::core::types::{LedgerMutations, SessionKind, SessionOutcome, SessionReport};
use crate::errors::LedgerError;
use crate::io::gate::CommandGate;
use crate::io::process::CancelFlag;
use crate::io::project::{ProjectPaths, prepare_project};
use crate::io::runtime::{
    AgentRuntime, RuntimeReport, RuntimeStatus, SessionRequest, gate_commands,
};
use crate::looping::SessionDriver;

/// Create a deterministic feature record.
pub fn feature(name: &str, passes: bool) -> Feature {
    Feature {
        feature: name.to_string(),
        description: format!("{name} works"),
        test_procedure: vec![format!("open the {name} page"), "check the result".to_string()],
        passes,
        extra: Map::new(),
    }
}

pub fn ledger_with(features: Vec<Feature>) -> Ledger {
    Ledger::new(features)
}

/// A continuation-session report with no ledger changes.
pub fn session_report(iteration: u32, outcome: SessionOutcome) -> SessionReport {
    SessionReport {
        iteration,
        kind: SessionKind::Continue,
        resumed_init: false,
        outcome,
        mutations: LedgerMutations::default(),
        violations: Vec::new(),
        denied_commands: Vec::new(),
        summary: None,
        duration: Duration::from_millis(10),
    }
}

/// A prepared project directory that is removed on drop.
pub struct TestProject {
    _dir: tempfile::TempDir,
    pub paths: ProjectPaths,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let paths = prepare_project(&dir.path().join("app"), None)?;
        Ok(Self { _dir: dir, paths })
    }

    /// Write `ledger` as the project's current `feature_list.json`.
    pub fn write_ledger(&self, ledger: &Ledger) -> Result<()> {
        fs::write(&self.paths.ledger_path, ledger.to_json()?)?;
        Ok(())
    }
}

/// What a scripted session does to `feature_list.json`.
#[derive(Debug, Clone)]
pub enum LedgerWrite {
    /// Leave the file alone.
    Keep,
    Replace(Ledger),
    /// Write raw bytes (for truncated or malformed ledgers).
    Raw(String),
    Delete,
}

/// One scripted agent session.
#[derive(Debug, Clone)]
pub struct ScriptedSession {
    pub ledger: LedgerWrite,
    /// Shell commands the agent attempts; each goes through the gate.
    pub commands: Vec<String>,
    pub status: RuntimeStatus,
}

impl ScriptedSession {
    pub fn writes(ledger: Ledger) -> Self {
        Self {
            ledger: LedgerWrite::Replace(ledger),
            commands: Vec::new(),
            status: RuntimeStatus::Completed,
        }
    }

    pub fn with_status(status: RuntimeStatus) -> Self {
        Self {
            ledger: LedgerWrite::Keep,
            commands: Vec::new(),
            status,
        }
    }
}

/// Runtime that replays scripted sessions instead of spawning an agent.
#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    sessions: Mutex<VecDeque<ScriptedSession>>,
    requests: Mutex<Vec<SessionRequest>>,
}

impl ScriptedRuntime {
    pub fn new(sessions: Vec<ScriptedSession>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request the runtime received, in order.
    pub fn requests(&self) -> Vec<SessionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl AgentRuntime for ScriptedRuntime {
    fn run(
        &self,
        request: &SessionRequest,
        gate: &dyn CommandGate,
        _cancel: &CancelFlag,
    ) -> Result<RuntimeReport> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let session = self
            .sessions
            .lock()
            .map_err(|_| anyhow!("scripted runtime poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("scripted runtime has no session left"))?;

        let ledger_path = request.workdir.join("feature_list.json");
        match &session.ledger {
            LedgerWrite::Keep => {}
            LedgerWrite::Replace(ledger) => fs::write(&ledger_path, ledger.to_json()?)?,
            LedgerWrite::Raw(raw) => fs::write(&ledger_path, raw)?,
            LedgerWrite::Delete => fs::remove_file(&ledger_path)?,
        }

        let mut report = RuntimeReport::with_status(session.status, Duration::from_millis(5));
        report.denied_commands = gate_commands(gate, &session.commands);
        Ok(report)
    }
}

/// Loop driver that hands out canned session reports.
#[derive(Debug, Default)]
pub struct ScriptedSessions {
    progress: Option<LedgerSummary>,
    reports: Mutex<VecDeque<SessionReport>>,
    repeat: Option<SessionReport>,
    error: Mutex<Option<LedgerError>>,
    calls: AtomicU32,
}

impl ScriptedSessions {
    /// Replay `reports` in order, then fail.
    pub fn new(progress: Option<LedgerSummary>, reports: Vec<SessionReport>) -> Self {
        Self {
            progress,
            reports: Mutex::new(reports.into()),
            ..Self::default()
        }
    }

    /// Return `report` for every session.
    pub fn repeating(progress: Option<LedgerSummary>, report: SessionReport) -> Self {
        Self {
            progress,
            repeat: Some(report),
            ..Self::default()
        }
    }

    /// Fail the first session with `error`.
    pub fn failing(error: LedgerError) -> Self {
        Self {
            error: Mutex::new(Some(error)),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SessionDriver for ScriptedSessions {
    fn progress(&self) -> Result<Option<LedgerSummary>> {
        Ok(self.progress.clone())
    }

    fn run_session(&self, iteration: u32) -> Result<SessionReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.error.lock().ok().and_then(|mut slot| slot.take()) {
            return Err(error.into());
        }
        let next = self
            .reports
            .lock()
            .ok()
            .and_then(|mut reports| reports.pop_front())
            .or_else(|| self.repeat.clone());
        let mut report = next.ok_or_else(|| anyhow!("no scripted session left"))?;
        report.iteration = iteration;
        Ok(report)
    }
}
