//! End-to-end session lifecycle tests.
//!
//! Drives the real orchestrator and run loop against a scripted runtime:
//! initialization, coding sessions, ledger protection and locking.

use std::fs;
use std::time::Duration;

use autocoder::core::types::{SessionKind, SessionOutcome};
use autocoder::errors::LockError;
use autocoder::io::config::HarnessConfig;
use autocoder::io::ledger_store;
use autocoder::io::lock::ProjectLock;
use autocoder::io::process::CancelFlag;
use autocoder::io::runtime::RuntimeStatus;
use autocoder::looping::{LoopConfig, LoopStop, run_loop};
use autocoder::session::SessionOrchestrator;
use autocoder::test_support::{
    LedgerWrite, ScriptedRuntime, ScriptedSession, TestProject, feature, ledger_with,
};

fn loop_config(max_iterations: Option<u32>) -> LoopConfig {
    LoopConfig {
        max_iterations,
        max_consecutive_failures: 3,
        delay: Duration::ZERO,
    }
}

fn config() -> HarnessConfig {
    HarnessConfig {
        inter_session_delay_secs: 0,
        ..HarnessConfig::default()
    }
}

/// Init creates three features, two coding sessions finish them, the loop stops as done.
#[test]
fn project_runs_from_empty_to_done() {
    let project = TestProject::new().expect("project");
    let created = ledger_with(vec![
        feature("login", false),
        feature("logout", false),
        feature("profile", false),
    ]);
    let mut halfway = created.clone();
    halfway.features[0].passes = true;
    halfway.features[1].passes = true;
    let mut finished = halfway.clone();
    finished.features[2].passes = true;

    let runtime = ScriptedRuntime::new(vec![
        ScriptedSession::writes(created),
        ScriptedSession::writes(halfway),
        ScriptedSession::writes(finished.clone()),
    ]);
    let cancel = CancelFlag::new();
    let orch = SessionOrchestrator::new(config(), project.paths.clone(), runtime, cancel.clone());

    let mut kinds = Vec::new();
    let outcome = run_loop(&orch, &loop_config(None), &cancel, |report| {
        kinds.push(report.kind);
    })
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::Done);
    assert_eq!(outcome.sessions_run, 3);
    assert_eq!(
        kinds,
        vec![SessionKind::Init, SessionKind::Continue, SessionKind::Continue]
    );
    assert_eq!(outcome.last_summary.map(|s| s.percent), Some(100.0));
    assert_eq!(
        ledger_store::load(&project.paths.ledger_path).expect("load"),
        Some(finished)
    );

    let requests = orch.runtime().requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[2].instructions.contains("- profile"));
    assert!(!requests[2].instructions.contains("- login\n"));
}

/// A later run of the loop picks up where the previous one stopped.
#[test]
fn iteration_cap_then_resume() {
    let project = TestProject::new().expect("project");
    let created = ledger_with(vec![feature("login", false), feature("logout", false)]);
    let mut finished = created.clone();
    finished.features[0].passes = true;
    finished.features[1].passes = true;

    let cancel = CancelFlag::new();
    let first = SessionOrchestrator::new(
        config(),
        project.paths.clone(),
        ScriptedRuntime::new(vec![ScriptedSession::writes(created)]),
        cancel.clone(),
    );
    let outcome = run_loop(&first, &loop_config(Some(1)), &cancel, |_| {}).expect("first run");
    assert_eq!(outcome.stop, LoopStop::IterationCap { max_iterations: 1 });

    let second = SessionOrchestrator::new(
        config(),
        project.paths.clone(),
        ScriptedRuntime::new(vec![ScriptedSession::writes(finished)]),
        cancel.clone(),
    );
    let mut kinds = Vec::new();
    let outcome = run_loop(&second, &loop_config(None), &cancel, |report| {
        kinds.push(report.kind);
    })
    .expect("second run");

    assert_eq!(outcome.stop, LoopStop::Done);
    assert_eq!(kinds, vec![SessionKind::Continue]);
    assert!(project.paths.session_dir(2).join("meta.json").exists());
}

/// Flipping a passing feature back and renaming another are undone on disk.
#[test]
fn illegal_ledger_edits_are_reverted() {
    let project = TestProject::new().expect("project");
    let prev = ledger_with(vec![feature("login", true), feature("logout", false)]);
    project.write_ledger(&prev).expect("ledger");
    let tampered = ledger_with(vec![feature("login", false), feature("sign-out", false)]);

    let orch = SessionOrchestrator::new(
        config(),
        project.paths.clone(),
        ScriptedRuntime::new(vec![ScriptedSession::writes(tampered)]),
        CancelFlag::new(),
    );
    let report = orch.run_once(1).expect("session");

    assert!(!report.violations.is_empty());
    let stored = ledger_store::load(&project.paths.ledger_path)
        .expect("load")
        .expect("ledger");
    assert!(stored.get("login").is_some_and(|f| f.passes));
    assert!(stored.get("logout").is_some());
}

/// Ctrl+C during a ledger write must not turn the next run into a re-initialization.
#[test]
fn interrupted_coding_session_resumes_as_coding() {
    let project = TestProject::new().expect("project");
    let prev = ledger_with(vec![feature("login", true), feature("logout", false)]);
    project.write_ledger(&prev).expect("ledger");

    let cancel = CancelFlag::new();
    let first = SessionOrchestrator::new(
        config(),
        project.paths.clone(),
        ScriptedRuntime::new(vec![ScriptedSession {
            ledger: LedgerWrite::Raw("[\n  {\n    \"feature\": \"login\",".to_string()),
            commands: Vec::new(),
            status: RuntimeStatus::Interrupted,
        }]),
        cancel.clone(),
    );
    let outcome = run_loop(&first, &loop_config(None), &cancel, |_| {}).expect("first run");
    assert_eq!(outcome.stop, LoopStop::Interrupted);
    assert_eq!(
        ledger_store::load(&project.paths.ledger_path).expect("load"),
        Some(prev.clone())
    );

    let mut finished = prev;
    finished.features[1].passes = true;
    let cancel = CancelFlag::new();
    let second = SessionOrchestrator::new(
        config(),
        project.paths.clone(),
        ScriptedRuntime::new(vec![ScriptedSession::writes(finished)]),
        cancel.clone(),
    );
    let mut kinds = Vec::new();
    let outcome = run_loop(&second, &loop_config(None), &cancel, |report| {
        kinds.push(report.kind);
    })
    .expect("second run");

    assert_eq!(outcome.stop, LoopStop::Done);
    assert_eq!(kinds, vec![SessionKind::Continue]);
}

/// Failed sessions without progress stop the loop at the failure cap.
#[test]
fn repeated_failures_trip_the_cap() {
    let project = TestProject::new().expect("project");
    project
        .write_ledger(&ledger_with(vec![feature("login", false)]))
        .expect("ledger");
    let failed = || {
        ScriptedSession::with_status(RuntimeStatus::Failed {
            reason: "agent crashed".to_string(),
        })
    };
    let cancel = CancelFlag::new();
    let orch = SessionOrchestrator::new(
        config(),
        project.paths.clone(),
        ScriptedRuntime::new(vec![failed(), failed(), failed(), failed()]),
        cancel.clone(),
    );

    let mut outcomes = Vec::new();
    let outcome = run_loop(&orch, &loop_config(None), &cancel, |report| {
        outcomes.push(report.outcome.clone());
    })
    .expect("loop");

    assert!(matches!(
        outcome.stop,
        LoopStop::FailureCap { consecutive: 3, .. }
    ));
    assert_eq!(outcome.sessions_run, 3);
    assert!(
        outcomes
            .iter()
            .all(|o| matches!(o, SessionOutcome::Failed { .. }))
    );
}

/// An init session killed mid-write is quarantined and redone.
#[test]
fn interrupted_initialization_is_resumed() {
    let project = TestProject::new().expect("project");
    fs::write(&project.paths.ledger_path, "[{\"feature\": \"log").expect("partial");
    let created = ledger_with(vec![feature("login", false)]);

    let orch = SessionOrchestrator::new(
        config(),
        project.paths.clone(),
        ScriptedRuntime::new(vec![ScriptedSession::writes(created.clone())]),
        CancelFlag::new(),
    );
    let report = orch.run_once(1).expect("session");

    assert_eq!(report.kind, SessionKind::Init);
    assert!(report.resumed_init);
    assert_eq!(
        ledger_store::load(&project.paths.ledger_path).expect("load"),
        Some(created)
    );
}

#[test]
fn second_lock_on_same_project_is_refused() {
    let project = TestProject::new().expect("project");
    let held = ProjectLock::acquire(&project.paths.lock_path).expect("first lock");

    let err = ProjectLock::acquire(&project.paths.lock_path).expect_err("contention");
    assert!(matches!(err, LockError::Held { .. }), "{err}");

    drop(held);
    ProjectLock::acquire(&project.paths.lock_path).expect("lock after release");
}
