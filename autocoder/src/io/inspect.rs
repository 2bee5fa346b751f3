//! Reading a project directory into a [`ProjectState`].

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, instrument};

use crate::core::classifier::{ProjectState, classify};
use crate::errors::LedgerError;
use crate::io::ledger_store;
use crate::io::project::ProjectPaths;

/// Classify the project from what is on disk right now.
#[instrument(skip_all, fields(root = %paths.root.display()))]
pub fn inspect_project(
    paths: &ProjectPaths,
    notes_tail_lines: usize,
) -> Result<ProjectState, LedgerError> {
    let bytes = ledger_store::read_bytes(&paths.ledger_path)?;
    let notes_tail = read_notes_tail(&paths.notes_path, notes_tail_lines)?;
    let state = classify(&paths.ledger_path, bytes.as_deref(), notes_tail)?;
    debug!(kind = state.kind().as_str(), "classified project");
    Ok(state)
}

/// The last `limit` non-blank lines of the progress notes. Missing file is empty.
pub fn read_notes_tail(path: &Path, limit: usize) -> Result<Vec<String>, LedgerError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(LedgerError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(limit);
    Ok(lines[start..].iter().map(|line| line.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{feature, ledger_with};

    #[test]
    fn notes_tail_keeps_last_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("claude-progress.txt");
        fs::write(&path, "one\n\ntwo\nthree\n   \nfour\n").expect("write");
        assert_eq!(
            read_notes_tail(&path, 2).expect("tail"),
            vec!["three".to_string(), "four".to_string()]
        );
        assert!(
            read_notes_tail(&temp.path().join("missing.txt"), 5)
                .expect("tail")
                .is_empty()
        );
    }

    #[test]
    fn inspects_each_project_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(temp.path());

        assert_eq!(
            inspect_project(&paths, 5).expect("fresh"),
            ProjectState::Initialize
        );

        fs::write(&paths.ledger_path, "[{\"feature\": \"lo").expect("write");
        assert!(matches!(
            inspect_project(&paths, 5).expect("truncated"),
            ProjectState::ResumeIncompleteInit { .. }
        ));

        let ledger = ledger_with(vec![feature("login", true), feature("logout", false)]);
        ledger_store::save(&paths.ledger_path, &ledger).expect("save");
        fs::write(&paths.notes_path, "session 1 done\n").expect("notes");
        match inspect_project(&paths, 5).expect("continue") {
            ProjectState::Continue {
                summary,
                notes_tail,
                ..
            } => {
                assert_eq!(summary.complete, 1);
                assert_eq!(notes_tail, vec!["session 1 done".to_string()]);
            }
            other => panic!("unexpected state {other:?}"),
        }

        fs::write(&paths.ledger_path, "{\"features\": 3}").expect("write");
        assert!(matches!(
            inspect_project(&paths, 5),
            Err(LedgerError::CorruptLedger { .. })
        ));
    }
}
