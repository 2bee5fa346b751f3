//! Deterministic classification of a project into the next session kind.

use std::path::Path;

use crate::core::ledger::{Ledger, LedgerDefect, LedgerSummary, parse_ledger};
use crate::core::types::SessionKind;
use crate::errors::LedgerError;

/// What the next session has to do for a project.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectState {
    /// No ledger yet.
    Initialize,
    /// A ledger exists but an earlier initialization never finished writing it.
    ResumeIncompleteInit { reason: String },
    /// A usable ledger exists.
    Continue {
        ledger: Ledger,
        summary: LedgerSummary,
        notes_tail: Vec<String>,
    },
}

impl ProjectState {
    pub fn kind(&self) -> SessionKind {
        match self {
            ProjectState::Initialize | ProjectState::ResumeIncompleteInit { .. } => {
                SessionKind::Init
            }
            ProjectState::Continue { .. } => SessionKind::Continue,
        }
    }

    pub fn summary(&self) -> Option<&LedgerSummary> {
        match self {
            ProjectState::Continue { summary, .. } => Some(summary),
            _ => None,
        }
    }
}

/// Classify from the raw ledger bytes (`None` when the file is absent).
///
/// - absent → `Initialize`
/// - empty, cut off, or an empty array → `ResumeIncompleteInit`
/// - valid JSON with the wrong shape → `CorruptLedger`
/// - otherwise → `Continue`
pub fn classify(
    ledger_path: &Path,
    ledger_bytes: Option<&[u8]>,
    notes_tail: Vec<String>,
) -> Result<ProjectState, LedgerError> {
    let Some(bytes) = ledger_bytes else {
        return Ok(ProjectState::Initialize);
    };
    match parse_ledger(bytes) {
        Ok(ledger) if ledger.is_empty() => Ok(ProjectState::ResumeIncompleteInit {
            reason: "ledger contains no features".to_string(),
        }),
        Ok(ledger) => Ok(ProjectState::Continue {
            summary: ledger.summary(),
            ledger,
            notes_tail,
        }),
        Err(LedgerDefect::Truncated(reason)) => Ok(ProjectState::ResumeIncompleteInit { reason }),
        Err(LedgerDefect::Malformed(reason)) => Err(LedgerError::CorruptLedger {
            path: ledger_path.to_path_buf(),
            reason,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{feature, ledger_with};

    fn path() -> &'static Path {
        Path::new("feature_list.json")
    }

    #[test]
    fn missing_ledger_is_initialize() {
        let state = classify(path(), None, Vec::new()).expect("classify");
        assert_eq!(state, ProjectState::Initialize);
        assert_eq!(state.kind(), SessionKind::Init);
    }

    #[test]
    fn valid_ledger_is_continue_with_summary() {
        let ledger = ledger_with((0..40).map(|i| feature(&format!("f{i}"), i < 10)).collect());
        let raw = ledger.to_json().expect("serialize");
        let notes = vec!["session 3: login done".to_string()];
        let state = classify(path(), Some(raw.as_bytes()), notes.clone()).expect("classify");
        let ProjectState::Continue {
            summary,
            notes_tail,
            ..
        } = &state
        else {
            panic!("expected continue, got {state:?}");
        };
        assert_eq!((summary.total, summary.complete), (40, 10));
        assert_eq!(notes_tail, &notes);
        assert_eq!(state.kind(), SessionKind::Continue);
    }

    /// A crash while the initializer was writing leaves a partial file behind.
    #[test]
    fn truncated_or_empty_ledger_resumes_init() {
        for raw in ["", "[\n  {\n    \"feature\": \"lo", "[]"] {
            let state = classify(path(), Some(raw.as_bytes()), Vec::new()).expect("classify");
            assert!(
                matches!(state, ProjectState::ResumeIncompleteInit { .. }),
                "{raw:?} gave {state:?}"
            );
            assert_eq!(state.kind(), SessionKind::Init);
        }
    }

    #[test]
    fn wrong_shape_is_corrupt() {
        let err = classify(path(), Some(br#"{"features": 3}"#), Vec::new()).unwrap_err();
        assert!(matches!(err, LedgerError::CorruptLedger { .. }));
        assert!(err.is_fatal());
    }
}
