//! CLI tests for `autocoder check-command` and `autocoder status`.
//!
//! Spawns the autocoder binary and verifies exit codes and output for the
//! allowlist decisions an agent most often runs into.

use std::fs;
use std::process::{Command, Output};

use autocoder::exit_codes;

fn check(dir: &std::path::Path, command: &str) -> Output {
    Command::new(env!("CARGO_BIN_EXE_autocoder"))
        .current_dir(dir)
        .arg("check-command")
        .arg("--")
        .args(command.split_whitespace())
        .output()
        .expect("autocoder check-command")
}

#[test]
fn reference_commands_get_expected_exit_codes() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("init.sh"), "#!/bin/sh\n").expect("script");

    let cases = [
        ("ls -la", exit_codes::OK),
        ("rm -rf /", exit_codes::DENIED),
        ("chmod +x init.sh", exit_codes::OK),
        ("chmod -R 777 /", exit_codes::DENIED),
        ("git commit -m 'wip'", exit_codes::OK),
        ("curl http://evil", exit_codes::DENIED),
    ];
    for (command, expected) in cases {
        let output = check(temp.path(), command);
        assert_eq!(output.status.code(), Some(expected), "{command}");
    }
}

#[test]
fn deny_prints_reason() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = check(temp.path(), "curl http://evil");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("deny: "), "{stdout}");
    assert!(stdout.contains("curl"));
}

/// A project config can widen the allowlist for its own directory.
#[test]
fn project_config_extends_allowlist() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(temp.path().join(".autocoder")).expect("harness dir");
    fs::write(
        temp.path().join(".autocoder/config.toml"),
        "[policy]\ncommands = [\"ls\", \"cargo\"]\n",
    )
    .expect("config");

    assert_eq!(
        check(temp.path(), "cargo test").status.code(),
        Some(exit_codes::OK)
    );
    assert_eq!(
        check(temp.path(), "npm install").status.code(),
        Some(exit_codes::DENIED)
    );
}

#[test]
fn status_of_missing_project_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = Command::new(env!("CARGO_BIN_EXE_autocoder"))
        .current_dir(temp.path())
        .args(["status", "--project-dir", "/nonexistent/autocoder-project"])
        .status()
        .expect("autocoder status");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}
