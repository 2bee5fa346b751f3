//! Harness configuration stored under `.autocoder/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::policy::{CommandPolicy, DEFAULT_COMMANDS, DEFAULT_PKILL_TARGETS, DEFAULT_SCRIPT};

/// Harness configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields take the
/// defaults below; CLI flags override individual fields after loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Model identifier passed to the agent runtime.
    pub model: String,

    /// Wall-clock budget for one agent session.
    pub session_timeout_secs: u64,

    /// Pause between sessions.
    pub inter_session_delay_secs: u64,

    /// Hard failures without ledger progress tolerated back to back.
    pub max_consecutive_failures: u32,

    /// Bytes of agent stdout kept in memory per session (the transcript file is complete).
    pub transcript_limit_bytes: usize,

    /// Conversation turns allowed within one session.
    pub max_turns: u32,

    /// Lines of `claude-progress.txt` shown to the next session.
    pub notes_tail_lines: usize,

    /// Maximum bytes of session instructions before optional sections are dropped.
    pub prompt_budget_bytes: usize,

    pub agent: AgentConfig,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Program and leading arguments for the agent runtime (e.g. `["claude"]`).
    pub command: Vec<String>,
    pub allowed_tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    pub commands: Vec<String>,
    pub pkill_targets: Vec<String>,
    pub script: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string()],
            allowed_tools: ["Read", "Write", "Edit", "Glob", "Grep", "Bash"]
                .iter()
                .map(|tool| tool.to_string())
                .collect(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            commands: DEFAULT_COMMANDS.iter().map(|c| c.to_string()).collect(),
            pkill_targets: DEFAULT_PKILL_TARGETS.iter().map(|t| t.to_string()).collect(),
            script: DEFAULT_SCRIPT.to_string(),
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250929".to_string(),
            session_timeout_secs: 30 * 60,
            inter_session_delay_secs: 3,
            max_consecutive_failures: 3,
            transcript_limit_bytes: 1_000_000,
            max_turns: 1000,
            notes_tail_lines: 20,
            prompt_budget_bytes: 40_000,
            agent: AgentConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        if self.session_timeout_secs == 0 {
            return Err(anyhow!("session_timeout_secs must be > 0"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(anyhow!("max_consecutive_failures must be > 0"));
        }
        if self.transcript_limit_bytes == 0 {
            return Err(anyhow!("transcript_limit_bytes must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.max_turns == 0 {
            return Err(anyhow!("max_turns must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.policy.commands.iter().all(|c| c.trim().is_empty()) {
            return Err(anyhow!("policy.commands must list at least one command"));
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn inter_session_delay(&self) -> Duration {
        Duration::from_secs(self.inter_session_delay_secs)
    }

    /// The allowlist this configuration describes.
    pub fn command_policy(&self) -> CommandPolicy {
        CommandPolicy::new(
            &self.policy.commands,
            &self.policy.pkill_targets,
            &self.policy.script,
        )
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HarnessConfig::default()`.
pub fn load_config(path: &Path) -> Result<HarnessConfig> {
    if !path.exists() {
        let cfg = HarnessConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HarnessConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
