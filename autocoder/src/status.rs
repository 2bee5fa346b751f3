//! Human-readable progress output for `autocoder status` and `autocoder run`.

use std::fmt::Write as _;

use anyhow::Result;

use crate::core::classifier::ProjectState;
use crate::core::types::{SessionKind, SessionOutcome, SessionReport};
use crate::io::inspect::inspect_project;
use crate::io::project::ProjectPaths;
use crate::looping::{LoopOutcome, LoopStop};

const NEXT_SHOWN: usize = 5;
const RULE_WIDTH: usize = 70;

/// Render the progress box for a project directory.
pub fn render_status(paths: &ProjectPaths, notes_tail_lines: usize) -> Result<String> {
    let state = inspect_project(paths, notes_tail_lines)?;
    let mut out = String::new();
    let _ = writeln!(out, "Project: {}", paths.root.display());

    match &state {
        ProjectState::Initialize => {
            out.push_str("No feature list found yet. It will be created in the first session.\n");
        }
        ProjectState::ResumeIncompleteInit { reason } => {
            let _ = writeln!(
                out,
                "Initialization did not finish ({reason}). The next session will redo it."
            );
        }
        ProjectState::Continue {
            ledger,
            summary,
            notes_tail,
        } => {
            out.push_str(&progress_box(
                summary.total,
                summary.complete,
                summary.percent,
                &ledger.next_incomplete(usize::MAX),
            ));
            if !notes_tail.is_empty() {
                out.push_str("\n  Recent progress notes:\n");
                for line in notes_tail {
                    let _ = writeln!(out, "    {line}");
                }
            }
        }
    }

    let script = if paths.init_script_path.exists() {
        "present"
    } else {
        "missing"
    };
    let _ = writeln!(out, "\n  Setup script (init.sh): {script}");
    Ok(out)
}

fn progress_box(total: usize, complete: usize, percent: f64, incomplete: &[String]) -> String {
    let mut out = String::new();
    out.push_str("╔════════════════════════════════════════════════════════════════╗\n");
    out.push_str("║                     PROGRESS SUMMARY                           ║\n");
    out.push_str("╚════════════════════════════════════════════════════════════════╝\n\n");
    let _ = writeln!(out, "  Total Features:     {total}");
    let _ = writeln!(out, "  Completed:          {complete}");
    let _ = writeln!(out, "  Remaining:          {}", total - complete);
    let _ = writeln!(out, "  Progress:           {percent:.1}%");
    if incomplete.is_empty() {
        return out;
    }
    out.push_str("\n  Next Priority Features:\n");
    for (index, name) in incomplete.iter().take(NEXT_SHOWN).enumerate() {
        let _ = writeln!(out, "    {}. {name}", index + 1);
    }
    if incomplete.len() > NEXT_SHOWN {
        let _ = writeln!(out, "    ... and {} more", incomplete.len() - NEXT_SHOWN);
    }
    out
}

/// Banner printed after each session of `autocoder run`.
pub fn session_banner(report: &SessionReport) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let title = match (report.kind, report.resumed_init) {
        (SessionKind::Init, false) => "INITIALIZATION",
        (SessionKind::Init, true) => "INITIALIZATION (resumed)",
        (SessionKind::Continue, _) => "CODING",
    };
    let outcome = match &report.outcome {
        SessionOutcome::Completed => "completed".to_string(),
        SessionOutcome::TimedOut { after_secs } => format!("timed out after {after_secs}s"),
        SessionOutcome::Failed { reason } => format!("failed: {reason}"),
        SessionOutcome::Interrupted => "interrupted".to_string(),
    };

    let mut out = String::new();
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "  SESSION {}: {title}", report.iteration);
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "  Outcome:   {outcome}");
    let _ = writeln!(out, "  Duration:  {:.2}s", report.duration.as_secs_f64());
    if report.mutations.created > 0 {
        let _ = writeln!(out, "  Created:   {} features", report.mutations.created);
    }
    if !report.mutations.completed.is_empty() {
        let _ = writeln!(out, "  Completed: {}", report.mutations.completed.join(", "));
    }
    if !report.mutations.appended.is_empty() {
        let _ = writeln!(out, "  Appended:  {}", report.mutations.appended.join(", "));
    }
    for violation in &report.violations {
        let _ = writeln!(out, "  Rejected:  {violation}");
    }
    for denied in &report.denied_commands {
        let _ = writeln!(out, "  Denied:    {} ({})", denied.command, denied.reason);
    }
    if let Some(summary) = &report.summary {
        let _ = writeln!(
            out,
            "  Progress:  {}/{} ({:.1}%)",
            summary.complete, summary.total, summary.percent
        );
    }
    out
}

/// One-line explanation of why the loop stopped.
pub fn stop_message(outcome: &LoopOutcome) -> String {
    let sessions = outcome.sessions_run;
    match &outcome.stop {
        LoopStop::Done => format!("All features pass after {sessions} session(s) this run."),
        LoopStop::IterationCap { max_iterations } => {
            format!("Reached maximum iterations ({max_iterations}). Run again to continue.")
        }
        LoopStop::FailureCap {
            consecutive,
            last_reason,
        } => format!(
            "Stopped after {consecutive} consecutive failed sessions without progress (last: {}).",
            last_reason.as_deref().unwrap_or("unknown")
        ),
        LoopStop::Interrupted => {
            "Interrupted. Run the same command again to resume.".to_string()
        }
    }
}
