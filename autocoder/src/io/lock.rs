//! Single-session guard for a project directory.
//!
//! The lock is an advisory `flock` on `.autocoder/session.lock`. The kernel
//! drops it when the holder exits, so a crashed harness never leaves a stale
//! lock behind; the pid written into the file is informational only.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::LockError;

/// Held for as long as the value lives.
#[derive(Debug)]
pub struct ProjectLock {
    path: PathBuf,
    _file: File,
}

impl ProjectLock {
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;

        match fs2::FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(err)
                if err.kind() == ErrorKind::WouldBlock
                    || err.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
            {
                return Err(LockError::Held {
                    path: path.to_path_buf(),
                    holder: read_holder(&mut file),
                });
            }
            Err(source) => return Err(io_err(source)),
        }

        file.set_len(0).map_err(io_err)?;
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        writeln!(file, "{}", std::process::id()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        debug!(path = %path.display(), pid = std::process::id(), "project lock acquired");

        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_holder(file: &mut File) -> Option<u32> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_until_release() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("session.lock");

        let first = ProjectLock::acquire(&path).expect("first lock");
        match ProjectLock::acquire(&path) {
            Err(LockError::Held { holder, .. }) => {
                assert_eq!(holder, Some(std::process::id()));
            }
            other => panic!("expected held lock, got {other:?}"),
        }

        drop(first);
        let again = ProjectLock::acquire(&path).expect("lock after release");
        assert_eq!(again.path(), path);
    }
}
