//! The command gate between the agent runtime and the validator.
//!
//! The agent runtime runs in another process and asks before every shell
//! command. Its `PreToolUse` hook runs `autocoder gate --socket PATH`, which
//! forwards the command over a Unix socket to the harness and prints the
//! answer in the hook's JSON format. One request line in, one decision line
//! out; an unreachable harness means deny.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::core::policy::{CommandPolicy, Decision, validate};
use crate::core::types::DeniedCommand;

const ACCEPT_POLL: Duration = Duration::from_millis(25);
const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Answers "may the agent run this command?".
pub trait CommandGate: Send + Sync {
    fn check(&self, command: &str) -> Decision;
}

/// Gate backed by the allowlist validator for one project.
#[derive(Debug, Clone)]
pub struct PolicyGate {
    policy: CommandPolicy,
    project_root: PathBuf,
}

impl PolicyGate {
    pub fn new(policy: CommandPolicy, project_root: impl Into<PathBuf>) -> Self {
        Self {
            policy,
            project_root: project_root.into(),
        }
    }

    pub fn policy(&self) -> &CommandPolicy {
        &self.policy
    }
}

impl CommandGate for PolicyGate {
    fn check(&self, command: &str) -> Decision {
        validate(command, &self.policy, &self.project_root)
    }
}

/// Check a command and remember it if denied.
pub fn check_and_record(
    gate: &dyn CommandGate,
    command: &str,
    denied: &Mutex<Vec<DeniedCommand>>,
) -> Decision {
    let decision = gate.check(command);
    match &decision {
        Decision::Allow => debug!(command, "command allowed"),
        Decision::Deny { reason } => {
            info!(command, reason = %reason, "command denied");
            if let Ok(mut list) = denied.lock() {
                list.push(DeniedCommand {
                    command: command.to_string(),
                    reason: reason.clone(),
                });
            }
        }
    }
    decision
}

#[derive(Debug, Serialize, Deserialize)]
struct GateRequest {
    command: String,
}

/// Socket path for one session; kept in the temp dir because Unix socket
/// paths are limited to ~100 bytes and project paths can be longer.
pub fn socket_path_for(iteration: u32) -> PathBuf {
    std::env::temp_dir().join(format!(
        "autocoder-gate-{}-{iteration}.sock",
        std::process::id()
    ))
}

/// Serve `gate` on `socket_path` while `body` runs, then shut the socket down.
///
/// Returns `body`'s result and every command the gate denied meanwhile.
pub fn serve_gate<T>(
    socket_path: &Path,
    gate: &dyn CommandGate,
    body: impl FnOnce() -> Result<T>,
) -> Result<(T, Vec<DeniedCommand>)> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .with_context(|| format!("remove stale socket {}", socket_path.display()))?;
    }
    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("bind gate socket {}", socket_path.display()))?;
    listener
        .set_nonblocking(true)
        .context("set gate socket nonblocking")?;

    let stop = AtomicBool::new(false);
    let denied = Mutex::new(Vec::new());
    let result = thread::scope(|scope| {
        scope.spawn(|| accept_loop(&listener, gate, &stop, &denied));
        let result = body();
        stop.store(true, Ordering::SeqCst);
        result
    });

    if let Err(err) = std::fs::remove_file(socket_path) {
        warn!(err = %err, path = %socket_path.display(), "failed to remove gate socket");
    }
    let denied = denied.into_inner().unwrap_or_else(|poison| poison.into_inner());
    Ok((result?, denied))
}

fn accept_loop(
    listener: &UnixListener,
    gate: &dyn CommandGate,
    stop: &AtomicBool,
    denied: &Mutex<Vec<DeniedCommand>>,
) {
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = answer(stream, gate, denied) {
                    warn!(err = %format!("{err:#}"), "gate request failed");
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(err) => {
                warn!(err = %err, "gate accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn answer(
    stream: UnixStream,
    gate: &dyn CommandGate,
    denied: &Mutex<Vec<DeniedCommand>>,
) -> Result<()> {
    stream
        .set_nonblocking(false)
        .context("set gate stream blocking")?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream.set_write_timeout(Some(IO_TIMEOUT))?;
    let mut reader = BufReader::new(&stream);
    let mut line = String::new();
    reader.read_line(&mut line).context("read gate request")?;

    let decision = match serde_json::from_str::<GateRequest>(&line) {
        Ok(request) => check_and_record(gate, &request.command, denied),
        Err(err) => Decision::Deny {
            reason: format!("malformed gate request: {err}"),
        },
    };
    let mut reply = serde_json::to_string(&decision).context("serialize decision")?;
    reply.push('\n');
    (&stream)
        .write_all(reply.as_bytes())
        .context("write gate decision")?;
    Ok(())
}

/// Ask the harness listening on `socket_path` about `command`.
pub fn request_decision(socket_path: &Path, command: &str) -> Result<Decision> {
    let stream = UnixStream::connect(socket_path)
        .with_context(|| format!("connect gate socket {}", socket_path.display()))?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream.set_write_timeout(Some(IO_TIMEOUT))?;
    let mut request = serde_json::to_string(&GateRequest {
        command: command.to_string(),
    })?;
    request.push('\n');
    (&stream)
        .write_all(request.as_bytes())
        .context("send gate request")?;

    let mut line = String::new();
    BufReader::new(&stream)
        .read_line(&mut line)
        .context("read gate decision")?;
    serde_json::from_str(&line).with_context(|| format!("parse gate decision '{}'", line.trim()))
}

/// Turn a `PreToolUse` hook payload into the hook's JSON answer.
///
/// Non-Bash tools pass through. Anything that goes wrong denies.
pub fn hook_response(socket_path: &Path, payload: &str) -> Value {
    let event: Value = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(err) => return deny_payload(&format!("unreadable hook payload: {err}")),
    };
    if event.get("tool_name").and_then(Value::as_str) != Some("Bash") {
        return json!({});
    }
    let Some(command) = event.pointer("/tool_input/command").and_then(Value::as_str) else {
        return deny_payload("Bash call without a command");
    };
    match request_decision(socket_path, command) {
        Ok(Decision::Allow) => json!({}),
        Ok(Decision::Deny { reason }) => deny_payload(&reason),
        Err(err) => deny_payload(&format!("command gate unavailable: {err:#}")),
    }
}

fn deny_payload(reason: &str) -> Value {
    json!({
        "hookSpecificOutput": {
            "hookEventName": "PreToolUse",
            "permissionDecision": "deny",
            "permissionDecisionReason": reason,
        }
    })
}
