//! On-disk `feature_list.json`: load, create, update and durable writes.
//!
//! Every write goes through a temp file that is fsynced and renamed over the
//! ledger, then the directory is fsynced, so a reader never sees a half-written
//! ledger and a completed session's changes survive a crash.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::core::ledger::{Ledger, LedgerDefect, Transition, checked_update, parse_ledger};
use crate::errors::LedgerError;

/// Raw ledger bytes, or `None` when the file does not exist.
pub fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>, LedgerError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(io_error(path, source)),
    }
}

/// Load the ledger. Absent is `Ok(None)`; anything unparseable is `CorruptLedger`.
pub fn load(path: &Path) -> Result<Option<Ledger>, LedgerError> {
    let Some(bytes) = read_bytes(path)? else {
        return Ok(None);
    };
    match parse_ledger(&bytes) {
        Ok(ledger) => Ok(Some(ledger)),
        Err(LedgerDefect::Truncated(reason) | LedgerDefect::Malformed(reason)) => {
            Err(LedgerError::CorruptLedger {
                path: path.to_path_buf(),
                reason,
            })
        }
    }
}

/// Write a brand-new ledger. Refuses to overwrite an existing file.
#[instrument(skip_all, fields(path = %path.display(), features = ledger.len()))]
pub fn create(path: &Path, ledger: &Ledger) -> Result<(), LedgerError> {
    if path.exists() {
        return Err(LedgerError::AlreadyExists {
            path: path.to_path_buf(),
        });
    }
    save(path, ledger)
}

/// Mark one feature as passing and persist it when it changed.
#[instrument(skip_all, fields(path = %path.display(), feature = name))]
pub fn mark_complete(path: &Path, name: &str) -> Result<Transition, LedgerError> {
    let mut ledger = load(path)?.ok_or_else(|| LedgerError::Missing {
        path: path.to_path_buf(),
    })?;
    let transition = ledger.mark_complete(name)?;
    if transition == Transition::Completed {
        save(path, &ledger)?;
        info!("feature marked complete");
    } else {
        debug!("feature already complete");
    }
    Ok(transition)
}

/// Replace the ledger with `next` if the change follows the append-only rule.
///
/// On `InvariantViolation` the file is left untouched.
pub fn update(path: &Path, next: Ledger) -> Result<Ledger, LedgerError> {
    let prev = load(path)?.ok_or_else(|| LedgerError::Missing {
        path: path.to_path_buf(),
    })?;
    let accepted = checked_update(&prev, next)?;
    if accepted != prev {
        save(path, &accepted)?;
    }
    Ok(accepted)
}

/// Durably write `ledger` to `path` (temp file, fsync, rename, fsync dir).
pub fn save(path: &Path, ledger: &Ledger) -> Result<(), LedgerError> {
    let contents = ledger.to_json().map_err(|err| LedgerError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(ErrorKind::InvalidData, err),
    })?;
    write_durable(path, contents.as_bytes()).map_err(|source| io_error(path, source))
}

/// Move a ledger left behind by an unfinished initialization out of the way.
#[instrument(skip_all, fields(from = %path.display(), to = %destination.display()))]
pub fn quarantine(path: &Path, destination: &Path) -> Result<PathBuf, LedgerError> {
    fs::rename(path, destination).map_err(|source| io_error(path, source))?;
    sync_parent(destination).map_err(|source| io_error(destination, source))?;
    info!("moved incomplete ledger aside");
    Ok(destination.to_path_buf())
}

fn write_durable(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "ledger".to_string());
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    sync_parent(path)
}

fn sync_parent(path: &Path) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

fn io_error(path: &Path, source: std::io::Error) -> LedgerError {
    LedgerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{feature, ledger_with};

    fn two_features() -> Ledger {
        ledger_with(vec![feature("login", false), feature("logout", false)])
    }

    #[test]
    fn load_absent_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(load(&temp.path().join("feature_list.json")).expect("load").is_none());
    }

    #[test]
    fn create_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("feature_list.json");
        let ledger = two_features();
        create(&path, &ledger).expect("create");
        assert_eq!(load(&path).expect("load"), Some(ledger));
        assert!(!temp.path().join(".feature_list.json.tmp").exists());
    }

    #[test]
    fn create_refuses_to_overwrite() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("feature_list.json");
        create(&path, &two_features()).expect("create");
        let err = create(&path, &Ledger::default()).unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyExists { .. }));
        assert_eq!(load(&path).expect("load").expect("present").len(), 2);
    }

    #[test]
    fn load_corrupt_file_is_error_and_file_is_kept() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("feature_list.json");
        fs::write(&path, "{\"not\": \"a list\"}").expect("write");
        let err = load(&path).unwrap_err();
        assert!(matches!(err, LedgerError::CorruptLedger { .. }));
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "{\"not\": \"a list\"}"
        );
    }

    /// Only the named record changes on disk; every other byte is preserved.
    #[test]
    fn mark_complete_persists_single_flip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("feature_list.json");
        create(&path, &two_features()).expect("create");

        assert_eq!(mark_complete(&path, "login").expect("mark"), Transition::Completed);
        let before = fs::read_to_string(&path).expect("read");
        assert_eq!(
            mark_complete(&path, "login").expect("mark again"),
            Transition::AlreadyComplete
        );
        assert_eq!(fs::read_to_string(&path).expect("read"), before);

        let loaded = load(&path).expect("load").expect("present");
        assert!(loaded.features[0].passes);
        assert_eq!(loaded.features[1], two_features().features[1]);
    }

    #[test]
    fn mark_complete_unknown_and_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("feature_list.json");
        assert!(matches!(
            mark_complete(&path, "login").unwrap_err(),
            LedgerError::Missing { .. }
        ));
        create(&path, &two_features()).expect("create");
        assert!(matches!(
            mark_complete(&path, "signup").unwrap_err(),
            LedgerError::UnknownFeature { .. }
        ));
    }

    #[test]
    fn update_rejects_violation_and_leaves_file_unchanged() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("feature_list.json");
        create(&path, &two_features()).expect("create");
        mark_complete(&path, "login").expect("mark");
        let before = fs::read_to_string(&path).expect("read");

        let mut regressed = load(&path).expect("load").expect("present");
        regressed.features[0].passes = false;
        let err = update(&path, regressed).unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation { .. }));

        let mut shrunk = load(&path).expect("load").expect("present");
        shrunk.features.pop();
        assert!(update(&path, shrunk).is_err());

        let mut rewritten = load(&path).expect("load").expect("present");
        rewritten.features[1].description = "something else".to_string();
        assert!(update(&path, rewritten).is_err());

        assert_eq!(fs::read_to_string(&path).expect("read"), before);
    }

    #[test]
    fn update_accepts_append() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("feature_list.json");
        create(&path, &two_features()).expect("create");
        let mut next = two_features();
        next.features.push(feature("signup", false));
        let saved = update(&path, next.clone()).expect("update");
        assert_eq!(saved, next);
        assert_eq!(load(&path).expect("load"), Some(next));
    }

    #[test]
    fn quarantine_moves_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("feature_list.json");
        fs::write(&path, "[{\"feature\"").expect("write");
        let dest = temp.path().join("feature_list.incomplete-1.json");
        quarantine(&path, &dest).expect("quarantine");
        assert!(!path.exists());
        assert_eq!(fs::read_to_string(&dest).expect("read"), "[{\"feature\"");
    }
}
