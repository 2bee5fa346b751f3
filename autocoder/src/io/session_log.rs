//! Per-session artifacts under `.autocoder/sessions/<n>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::ledger::LedgerSummary;
use crate::core::types::{DeniedCommand, LedgerMutations, SessionKind, SessionOutcome};

#[derive(Debug, Clone, Serialize)]
pub struct SessionMeta {
    pub iteration: u32,
    pub kind: SessionKind,
    pub resumed_init: bool,
    #[serde(flatten)]
    pub outcome: SessionOutcome,
    pub started_at_unix: u64,
    pub duration_ms: u64,
    pub turns: Option<u32>,
    pub cost_usd: Option<f64>,
    pub tool_uses: usize,
    pub mutations: LedgerMutations,
    pub violations: Vec<String>,
    pub denied_commands: Vec<DeniedCommand>,
    pub summary: Option<LedgerSummary>,
}

#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub prompt_path: PathBuf,
    pub transcript_path: PathBuf,
    pub runtime_log_path: PathBuf,
}

impl SessionPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            meta_path: dir.join("meta.json"),
            prompt_path: dir.join("prompt.md"),
            transcript_path: dir.join("transcript.jsonl"),
            runtime_log_path: dir.join("runtime.log"),
            dir,
        }
    }

    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let paths = Self::new(dir);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create session dir {}", paths.dir.display()))?;
        Ok(paths)
    }

    pub fn write_prompt(&self, prompt: &str) -> Result<()> {
        write_text(&self.prompt_path, prompt)
    }

    pub fn write_meta(&self, meta: &SessionMeta) -> Result<()> {
        write_json(&self.meta_path, meta)
    }
}

/// Next unused session number (1-based) under `sessions_dir`.
pub fn next_session_number(sessions_dir: &Path) -> Result<u32> {
    let entries = match fs::read_dir(sessions_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(1),
        Err(err) => {
            return Err(err).with_context(|| format!("read {}", sessions_dir.display()));
        }
    };
    let mut highest = 0;
    for entry in entries {
        let entry = entry.with_context(|| format!("read {}", sessions_dir.display()))?;
        if let Some(n) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) {
            highest = highest.max(n);
        }
    }
    Ok(highest + 1)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_paths_are_stable() {
        let paths = SessionPaths::new("/p/.autocoder/sessions/3");
        assert!(paths.meta_path.ends_with("sessions/3/meta.json"));
        assert!(paths.prompt_path.ends_with("prompt.md"));
        assert!(paths.transcript_path.ends_with("transcript.jsonl"));
        assert!(paths.runtime_log_path.ends_with("runtime.log"));
    }

    #[test]
    fn numbers_continue_after_existing_sessions() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sessions = temp.path().join("sessions");
        assert_eq!(next_session_number(&sessions).expect("empty"), 1);
        for name in ["1", "2", "10", "notes"] {
            fs::create_dir_all(sessions.join(name)).expect("mkdir");
        }
        assert_eq!(next_session_number(&sessions).expect("next"), 11);
    }

    #[test]
    fn meta_flattens_outcome() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SessionPaths::create(temp.path().join("1")).expect("create");
        let meta = SessionMeta {
            iteration: 1,
            kind: SessionKind::Continue,
            resumed_init: false,
            outcome: SessionOutcome::TimedOut { after_secs: 60 },
            started_at_unix: 0,
            duration_ms: 60_000,
            turns: None,
            cost_usd: None,
            tool_uses: 0,
            mutations: LedgerMutations::default(),
            violations: Vec::new(),
            denied_commands: Vec::new(),
            summary: None,
        };
        paths.write_meta(&meta).expect("write");

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.meta_path).expect("read"))
                .expect("json");
        assert_eq!(value["kind"], "continue");
        assert_eq!(value["outcome"], "timed_out");
        assert_eq!(value["after_secs"], 60);
    }
}
