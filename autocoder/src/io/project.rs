//! Project directory layout and `.autocoder/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

/// Canonical file locations for one project directory.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub ledger_path: PathBuf,
    pub notes_path: PathBuf,
    pub init_script_path: PathBuf,
    pub app_spec_path: PathBuf,
    pub harness_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub lock_path: PathBuf,
    pub config_path: PathBuf,
    pub agent_settings_path: PathBuf,
    pub sessions_dir: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let harness_dir = root.join(".autocoder");
        Self {
            root: root.clone(),
            ledger_path: root.join("feature_list.json"),
            notes_path: root.join("claude-progress.txt"),
            init_script_path: root.join("init.sh"),
            app_spec_path: root.join("app_spec.txt"),
            harness_dir: harness_dir.clone(),
            gitignore_path: harness_dir.join(".gitignore"),
            lock_path: harness_dir.join("session.lock"),
            config_path: harness_dir.join("config.toml"),
            agent_settings_path: harness_dir.join("agent-settings.json"),
            sessions_dir: harness_dir.join("sessions"),
        }
    }

    pub fn session_dir(&self, iteration: u32) -> PathBuf {
        self.sessions_dir.join(iteration.to_string())
    }

    /// Where a broken ledger from an unfinished initialization is moved aside.
    pub fn quarantine_path(&self, unix_secs: u64) -> PathBuf {
        self.harness_dir
            .join(format!("feature_list.incomplete-{unix_secs}.json"))
    }
}

/// Place relative project directories under `<cwd>/generations/`.
pub fn resolve_project_dir(requested: &Path, cwd: &Path) -> PathBuf {
    if requested.is_absolute() {
        return requested.to_path_buf();
    }
    let name = requested
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| requested.to_path_buf());
    cwd.join("generations").join(name)
}

/// Create the project directory and the harness-owned `.autocoder/` tree.
///
/// Never touches the ledger or any agent-written file. When `app_spec` is
/// given and the project has no `app_spec.txt` yet, it is copied in.
pub fn prepare_project(root: &Path, app_spec: Option<&Path>) -> Result<ProjectPaths> {
    let paths = ProjectPaths::new(root);
    if paths.root.exists() && !paths.root.is_dir() {
        return Err(anyhow!(
            "project path {} exists but is not a directory",
            paths.root.display()
        ));
    }
    create_dir(&paths.root)?;
    create_dir(&paths.harness_dir)?;
    create_dir(&paths.sessions_dir)?;
    if !paths.gitignore_path.exists() {
        fs::write(&paths.gitignore_path, HARNESS_GITIGNORE)
            .with_context(|| format!("write {}", paths.gitignore_path.display()))?;
    }

    if let Some(source) = app_spec {
        if paths.app_spec_path.exists() {
            debug!(path = %paths.app_spec_path.display(), "app spec already present, keeping it");
        } else {
            fs::copy(source, &paths.app_spec_path).with_context(|| {
                format!(
                    "copy app spec {} to {}",
                    source.display(),
                    paths.app_spec_path.display()
                )
            })?;
        }
    }
    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

const HARNESS_GITIGNORE: &str = "*\n";
