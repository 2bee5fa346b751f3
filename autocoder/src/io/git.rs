//! Git adapter for session context.
//!
//! The harness only reads history to brief the agent; commits are the agent's
//! job. We keep a small, explicit wrapper around `git` subprocess calls.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// The command line [`Git::recent_log`] runs, for gating.
    pub fn recent_log_command(limit: usize) -> String {
        format!("git log --oneline -n {limit}")
    }

    /// One-line summaries of the newest `limit` commits.
    ///
    /// Returns `None` when the directory is not a repository or has no commits.
    #[instrument(skip_all, fields(limit))]
    pub fn recent_log(&self, limit: usize) -> Result<Option<String>> {
        let limit_arg = limit.to_string();
        let output = self.run(&["log", "--oneline", "-n", &limit_arg])?;
        if !output.status.success() {
            debug!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "no git history"
            );
            return Ok(None);
        }
        let log = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!log.is_empty()).then_some(log))
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .status()
            .expect("spawn git");
        assert!(status.success(), "git {args:?}");
    }

    #[test]
    fn recent_log_outside_repo_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = Git::new(temp.path()).recent_log(10).expect("log");
        assert_eq!(log, None);
    }

    #[test]
    fn recent_log_lists_commits() {
        let temp = tempfile::tempdir().expect("tempdir");
        git(temp.path(), &["init", "-q"]);
        std::fs::write(temp.path().join("a.txt"), "a").expect("write");
        git(temp.path(), &["add", "a.txt"]);
        git(temp.path(), &["commit", "-q", "-m", "first feature"]);

        let repo = Git::new(temp.path());
        let log = repo.recent_log(10).expect("log").expect("history");
        assert!(log.ends_with("first feature"));
        assert_eq!(log.lines().count(), 1);
    }

    #[test]
    fn log_command_matches_invocation() {
        assert_eq!(Git::recent_log_command(10), "git log --oneline -n 10");
    }
}
