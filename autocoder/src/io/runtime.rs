//! Agent runtime abstraction.
//!
//! The [`AgentRuntime`] trait decouples session orchestration from the actual
//! agent backend (currently the `claude` CLI). Tests use scripted runtimes that
//! edit the project directly without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::core::policy::Decision;
use crate::core::transcript::{TranscriptSummary, summarize};
use crate::core::types::{DeniedCommand, SessionKind};
use crate::io::auth::AuthMethod;
use crate::io::gate::{CommandGate, check_and_record, serve_gate};
use crate::io::process::{CancelFlag, CommandOutput, Termination, run_command_with_stream};

/// Parameters for one agent session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub kind: SessionKind,
    /// Instruction text fed to the agent on stdin.
    pub instructions: String,
    pub system_prompt: String,
    pub workdir: PathBuf,
    pub model: String,
    pub timeout: Duration,
    pub max_turns: u32,
    /// Complete agent event stream, one JSON object per line.
    pub transcript_path: PathBuf,
    /// Runtime stdout/stderr log (bounded).
    pub log_path: PathBuf,
    pub output_limit_bytes: usize,
    /// Unix socket the gate is served on while the session runs.
    pub gate_socket: PathBuf,
    /// Agent settings file that registers the gate hook.
    pub settings_path: PathBuf,
}

/// How the agent session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeStatus {
    Completed,
    TimedOut,
    Failed { reason: String },
    Interrupted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeReport {
    pub status: RuntimeStatus,
    pub turns: Option<u32>,
    pub cost_usd: Option<f64>,
    pub duration: Duration,
    pub denied_commands: Vec<DeniedCommand>,
    pub tool_uses: usize,
}

impl RuntimeReport {
    /// A report carrying only a status, for runtimes without transcript data.
    pub fn with_status(status: RuntimeStatus, duration: Duration) -> Self {
        Self {
            status,
            turns: None,
            cost_usd: None,
            duration,
            denied_commands: Vec::new(),
            tool_uses: 0,
        }
    }
}

/// Abstraction over agent execution backends.
pub trait AgentRuntime {
    /// Run one session. Every shell command the agent attempts must be put to
    /// `gate` before it executes; `cancel` stops the session early.
    fn run(
        &self,
        request: &SessionRequest,
        gate: &dyn CommandGate,
        cancel: &CancelFlag,
    ) -> Result<RuntimeReport>;
}

/// Runtime that spawns the `claude` CLI in headless stream-json mode.
#[derive(Debug, Clone)]
pub struct ClaudeCliRuntime {
    /// Program and leading arguments.
    pub command: Vec<String>,
    pub allowed_tools: Vec<String>,
    /// Executable the gate hook invokes (normally this binary).
    pub hook_program: PathBuf,
    pub auth: AuthMethod,
}

impl AgentRuntime for ClaudeCliRuntime {
    #[instrument(skip_all, fields(kind = request.kind.as_str(), model = %request.model, timeout_secs = request.timeout.as_secs()))]
    fn run(
        &self,
        request: &SessionRequest,
        gate: &dyn CommandGate,
        cancel: &CancelFlag,
    ) -> Result<RuntimeReport> {
        info!(workdir = %request.workdir.display(), "starting agent session");
        write_agent_settings(
            &request.settings_path,
            &self.hook_program,
            &request.gate_socket,
            &request.workdir,
        )?;

        let started = Instant::now();
        let cmd = self.build_command(request)?;
        let (output, denied_commands) = serve_gate(&request.gate_socket, gate, || {
            run_command_with_stream(
                cmd,
                Some(request.instructions.as_bytes()),
                request.timeout,
                request.output_limit_bytes,
                Some(&request.transcript_path),
                cancel,
            )
            .context("run agent")
        })?;
        let duration = started.elapsed();

        write_runtime_log(&request.log_path, &output, request.output_limit_bytes)?;
        let transcript = match fs::read_to_string(&request.transcript_path) {
            Ok(text) => summarize(&text),
            Err(err) => {
                warn!(err = %err, "transcript unreadable");
                TranscriptSummary::default()
            }
        };

        let status = runtime_status(&output, &transcript, request.timeout);
        debug!(status = ?status, tool_uses = transcript.tool_uses, "agent session finished");
        let result = transcript.result.as_ref();
        Ok(RuntimeReport {
            status,
            turns: result.and_then(|r| r.num_turns),
            cost_usd: result.and_then(|r| r.total_cost_usd),
            duration,
            denied_commands,
            tool_uses: transcript.tool_uses,
        })
    }
}

impl ClaudeCliRuntime {
    fn build_command(&self, request: &SessionRequest) -> Result<Command> {
        let (program, leading) = self
            .command
            .split_first()
            .context("agent command is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(leading)
            .arg("--print")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg("--model")
            .arg(&request.model)
            .arg("--max-turns")
            .arg(request.max_turns.to_string())
            .arg("--permission-mode")
            .arg("acceptEdits")
            .arg("--allowedTools")
            .arg(self.allowed_tools.join(","))
            .arg("--settings")
            .arg(&request.settings_path)
            .arg("--append-system-prompt")
            .arg(&request.system_prompt)
            .current_dir(&request.workdir);
        for var in self.auth.scrubbed_vars() {
            cmd.env_remove(var);
        }
        Ok(cmd)
    }
}

fn runtime_status(
    output: &CommandOutput,
    transcript: &TranscriptSummary,
    timeout: Duration,
) -> RuntimeStatus {
    match output.termination {
        Termination::TimedOut => {
            warn!(timeout_secs = timeout.as_secs(), "agent session timed out");
            RuntimeStatus::TimedOut
        }
        Termination::Cancelled => RuntimeStatus::Interrupted,
        Termination::Exited => match &transcript.result {
            Some(result) if result.is_error => RuntimeStatus::Failed {
                reason: result.error_reason(),
            },
            Some(_) => RuntimeStatus::Completed,
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let tail = stderr.trim().lines().last().unwrap_or("no output");
                warn!(exit_code = ?output.status.code(), "agent exited without a result event");
                RuntimeStatus::Failed {
                    reason: format!(
                        "agent exited with status {:?} without a result: {tail}",
                        output.status.code()
                    ),
                }
            }
        },
    }
}

/// Run `commands` through the gate as an agent would, recording denials.
///
/// For runtimes that drive commands themselves rather than via the hook.
pub fn gate_commands(gate: &dyn CommandGate, commands: &[String]) -> Vec<DeniedCommand> {
    let denied = Mutex::new(Vec::new());
    for command in commands {
        if let Decision::Allow = check_and_record(gate, command, &denied) {
            debug!(command = %command, "gated command would run");
        }
    }
    denied.into_inner().unwrap_or_else(|poison| poison.into_inner())
}

/// Write the agent settings that sandbox the session and register the gate hook.
pub fn write_agent_settings(
    path: &Path,
    hook_program: &Path,
    socket: &Path,
    project_root: &Path,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create settings dir {}", parent.display()))?;
    }
    let hook = format!(
        "{} gate --socket {}",
        shell_quote(&hook_program.to_string_lossy()),
        shell_quote(&socket.to_string_lossy())
    );
    let settings = json!({
        "permissions": {
            "allow": [format!("Edit({}/**)", project_root.display())],
        },
        "sandbox": { "enabled": true },
        "hooks": {
            "PreToolUse": [{
                "matcher": "Bash",
                "hooks": [{ "type": "command", "command": hook, "timeout": 30 }],
            }],
        },
    });
    let mut buf = serde_json::to_string_pretty(&settings)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write agent settings {}", path.display()))
}

fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

fn write_runtime_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create runtime log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str(&output.stdout_truncated_notice("agent"));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.stderr_truncated_notice("agent"));
    match output.termination {
        Termination::TimedOut => buf.push_str("\n[agent timed out]\n"),
        Termination::Cancelled => buf.push_str("\n[agent interrupted]\n"),
        Termination::Exited => {}
    }

    if buf.len() > output_limit {
        let mut keep = output_limit;
        while !buf.is_char_boundary(keep) {
            keep -= 1;
        }
        let truncated = format!("{}\n[truncated {} bytes]\n", &buf[..keep], buf.len() - keep);
        return fs::write(path, truncated)
            .with_context(|| format!("write runtime log {}", path.display()));
    }

    fs::write(path, buf).with_context(|| format!("write runtime log {}", path.display()))
}
