//! Session-continuation harness for long-running autonomous coding agents.
//!
//! Runs an agent against a project directory in bounded sessions until every
//! feature in `feature_list.json` passes, with every shell command the agent
//! attempts checked against an allowlist first.

use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use autocoder::core::policy::{Decision, validate};
use autocoder::errors::LockError;
use autocoder::exit_codes;
use autocoder::io::auth::{AuthMethod, check_credentials};
use autocoder::io::config::{HarnessConfig, load_config};
use autocoder::io::gate::hook_response;
use autocoder::io::lock::ProjectLock;
use autocoder::io::process::CancelFlag;
use autocoder::io::project::{ProjectPaths, prepare_project, resolve_project_dir};
use autocoder::io::runtime::ClaudeCliRuntime;
use autocoder::logging;
use autocoder::looping::{LoopConfig, LoopStop, run_loop};
use autocoder::session::SessionOrchestrator;
use autocoder::status::{render_status, session_banner, stop_message};

#[derive(Parser)]
#[command(
    name = "autocoder",
    version,
    about = "Session-continuation harness for long-running autonomous coding agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run agent sessions until every feature passes or a limit is reached.
    Run(RunArgs),
    /// Print the progress summary for a project.
    Status {
        /// Project directory (relative paths live under ./generations/).
        #[arg(long)]
        project_dir: PathBuf,
    },
    /// Check one shell command against the allowlist (exit 0 allow, 5 deny).
    CheckCommand {
        /// Project directory used for path scoping and config.
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        /// The command line; words are joined with spaces.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// PreToolUse hook client: reads the hook payload on stdin and asks the gate.
    #[command(hide = true)]
    Gate {
        #[arg(long)]
        socket: PathBuf,
    },
    /// Verify that the credential for the chosen auth method is present.
    AuthCheck {
        #[arg(long, value_enum, default_value_t = AuthMethod::Subscription)]
        auth_method: AuthMethod,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Project directory (relative paths live under ./generations/).
    #[arg(long)]
    project_dir: PathBuf,
    /// Stop after this many sessions (default: unlimited).
    #[arg(long)]
    max_iterations: Option<u32>,
    /// Model identifier passed to the agent.
    #[arg(long)]
    model: Option<String>,
    #[arg(long, value_enum, default_value_t = AuthMethod::Subscription)]
    auth_method: AuthMethod,
    /// Application description copied into the project as app_spec.txt.
    #[arg(long)]
    app_spec: Option<PathBuf>,
    /// Config file (default: <project>/.autocoder/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    session_timeout_secs: Option<u64>,
    #[arg(long)]
    max_consecutive_failures: Option<u32>,
    /// Pause between sessions.
    #[arg(long)]
    delay_secs: Option<u64>,
}

fn main() {
    let _ = dotenvy::dotenv();
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(args),
        Command::Status { project_dir } => cmd_status(&project_dir),
        Command::CheckCommand {
            project_dir,
            command,
        } => cmd_check_command(&project_dir, &command.join(" ")),
        Command::Gate { socket } => cmd_gate(&socket),
        Command::AuthCheck { auth_method } => cmd_auth_check(auth_method),
    }
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let root = resolve_project_dir(&args.project_dir, &env::current_dir()?);
    let paths = prepare_project(&root, args.app_spec.as_deref())?;
    let config_path = args.config.clone().unwrap_or_else(|| paths.config_path.clone());
    let config = apply_overrides(load_config(&config_path)?, &args)?;
    let credential = check_credentials(args.auth_method, |var| env::var(var).ok())?;

    let _lock = match ProjectLock::acquire(&paths.lock_path) {
        Ok(lock) => lock,
        Err(err @ LockError::Held { .. }) => {
            eprintln!("{err}");
            return Ok(exit_codes::LOCKED);
        }
        Err(err) => return Err(err.into()),
    };

    let cancel = CancelFlag::new();
    install_interrupt_handler(cancel.clone())?;

    print_run_header(&paths, &config, args.max_iterations, credential.var);
    let runtime = ClaudeCliRuntime {
        command: config.agent.command.clone(),
        allowed_tools: config.agent.allowed_tools.clone(),
        hook_program: env::current_exe().context("locate autocoder executable")?,
        auth: args.auth_method,
    };
    let loop_config = LoopConfig {
        max_iterations: args.max_iterations,
        max_consecutive_failures: config.max_consecutive_failures,
        delay: config.inter_session_delay(),
    };
    let notes_tail_lines = config.notes_tail_lines;
    let orchestrator = SessionOrchestrator::new(config, paths.clone(), runtime, cancel.clone());

    let outcome = run_loop(&orchestrator, &loop_config, &cancel, |report| {
        print!("{}", session_banner(report));
    })?;

    match render_status(&paths, notes_tail_lines) {
        Ok(text) => println!("\n{text}"),
        Err(err) => warn!(err = %format!("{err:#}"), "failed to render final status"),
    }
    println!("{}", stop_message(&outcome));
    Ok(match outcome.stop {
        LoopStop::Done | LoopStop::IterationCap { .. } => exit_codes::OK,
        LoopStop::FailureCap { .. } => exit_codes::FAILURE_CAP,
        LoopStop::Interrupted => exit_codes::INTERRUPTED,
    })
}

fn apply_overrides(mut config: HarnessConfig, args: &RunArgs) -> Result<HarnessConfig> {
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(secs) = args.session_timeout_secs {
        config.session_timeout_secs = secs;
    }
    if let Some(cap) = args.max_consecutive_failures {
        config.max_consecutive_failures = cap;
    }
    if let Some(secs) = args.delay_secs {
        config.inter_session_delay_secs = secs;
    }
    config.validate().context("invalid command-line overrides")?;
    Ok(config)
}

/// First Ctrl+C stops the current session; a second one exits at once.
fn install_interrupt_handler(cancel: CancelFlag) -> Result<()> {
    ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            std::process::exit(exit_codes::INTERRUPTED);
        }
        cancel.cancel();
        eprintln!("\nInterrupted: stopping the current session (Ctrl+C again to exit now)");
    })
    .context("install Ctrl+C handler")
}

fn print_run_header(
    paths: &ProjectPaths,
    config: &HarnessConfig,
    max_iterations: Option<u32>,
    credential_var: &str,
) {
    let rule = "=".repeat(70);
    println!("{rule}");
    println!("  AUTONOMOUS CODING AGENT");
    println!("{rule}");
    println!("Project directory: {}", paths.root.display());
    println!("Model: {}", config.model);
    match max_iterations {
        Some(max) => println!("Max iterations: {max}"),
        None => println!("Max iterations: unlimited"),
    }
    println!("Credential: {credential_var}");
    println!("Press Ctrl+C to stop; run the same command again to resume.\n");
}

fn cmd_status(project_dir: &Path) -> Result<i32> {
    let root = resolve_project_dir(project_dir, &env::current_dir()?);
    if !root.is_dir() {
        return Err(anyhow!("project directory {} does not exist", root.display()));
    }
    let paths = ProjectPaths::new(&root);
    let config = load_config(&paths.config_path)?;
    print!("{}", render_status(&paths, config.notes_tail_lines)?);
    Ok(exit_codes::OK)
}

fn cmd_check_command(project_dir: &Path, command: &str) -> Result<i32> {
    let root = env::current_dir()?.join(project_dir);
    let paths = ProjectPaths::new(&root);
    let config = load_config(&paths.config_path)?;
    match validate(command, &config.command_policy(), &root) {
        Decision::Allow => {
            println!("allow");
            Ok(exit_codes::OK)
        }
        Decision::Deny { reason } => {
            println!("deny: {reason}");
            Ok(exit_codes::DENIED)
        }
    }
}

fn cmd_gate(socket: &Path) -> Result<i32> {
    let mut payload = String::new();
    std::io::stdin()
        .read_to_string(&mut payload)
        .context("read hook payload")?;
    println!("{}", hook_response(socket, &payload));
    Ok(exit_codes::OK)
}

fn cmd_auth_check(method: AuthMethod) -> Result<i32> {
    let status = check_credentials(method, |var| env::var(var).ok())?;
    println!("{} is set: {}", status.var, status.preview);
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "autocoder",
            "run",
            "--project-dir",
            "./my_app",
            "--max-iterations",
            "3",
            "--auth-method",
            "api-key",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.max_iterations, Some(3));
        assert_eq!(args.auth_method, AuthMethod::ApiKey);
        assert_eq!(args.project_dir, PathBuf::from("./my_app"));
    }

    #[test]
    fn parse_check_command_keeps_flags() {
        let cli = Cli::parse_from(["autocoder", "check-command", "--", "chmod", "-R", "777", "."]);
        let Command::CheckCommand { command, .. } = cli.command else {
            panic!("expected check-command");
        };
        assert_eq!(command.join(" "), "chmod -R 777 .");
    }

    #[test]
    fn overrides_replace_config_values() {
        let args = RunArgs {
            project_dir: PathBuf::from("app"),
            max_iterations: None,
            model: Some("other-model".to_string()),
            auth_method: AuthMethod::Subscription,
            app_spec: None,
            config: None,
            session_timeout_secs: Some(60),
            max_consecutive_failures: None,
            delay_secs: Some(0),
        };
        let config = apply_overrides(HarnessConfig::default(), &args).expect("overrides");
        assert_eq!(config.model, "other-model");
        assert_eq!(config.session_timeout_secs, 60);
        assert_eq!(config.inter_session_delay_secs, 0);
    }

    #[test]
    fn zero_timeout_override_is_rejected() {
        let args = RunArgs {
            project_dir: PathBuf::from("app"),
            max_iterations: None,
            model: None,
            auth_method: AuthMethod::Subscription,
            app_spec: None,
            config: None,
            session_timeout_secs: Some(0),
            max_consecutive_failures: None,
            delay_secs: None,
        };
        assert!(apply_overrides(HarnessConfig::default(), &args).is_err());
    }
}
