//! Configuration system for runlog.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/runlog/config.toml` and/or `.runlog/config.toml`
//! in the workspace directory. These are tunables only; the identity of the run
//! itself comes from [`crate::identity::RunIdentity`].

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::filename::EventFileLayout;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunlogConfig {
    pub layout: EventFileLayout,
    pub live: LiveDirConfig,
    pub scheduler: SchedulerLogConfig,
    pub archive: ArchiveConfig,
    pub mirror: MirrorConfig,
}

/// Naming of the live (shared) log tree under `LOGS_ROOT_DIR`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveDirConfig {
    /// Sub-directory holding one event directory per run.
    pub events_subdir: String,
    /// `chrono` format of the run directory's leading timestamp.
    pub timestamp_format: String,
    /// Name of the run manifest written next to the event files.
    pub manifest_name: String,
}

impl Default for LiveDirConfig {
    fn default() -> Self {
        Self {
            events_subdir: "tensorboard".to_string(),
            timestamp_format: "%Y%m%d-%H%M".to_string(),
            manifest_name: "runlog.json".to_string(),
        }
    }
}

/// Naming of batch-scheduler output files: `<prefix>-<jobId>.<extension>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerLogConfig {
    pub subdir: String,
    pub prefix: String,
    pub extension: String,
}

impl Default for SchedulerLogConfig {
    fn default() -> Self {
        Self {
            subdir: "slurm".to_string(),
            prefix: "slurm".to_string(),
            extension: "out".to_string(),
        }
    }
}

/// What a finalize copies for the event logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveMode {
    /// Only the event file reconciled to this run's host and start time.
    #[default]
    ReconciledFile,
    /// Every file of the run directory.
    WholeRunDir,
}

/// Permanent per-experiment archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Archive root, relative to the working directory unless absolute.
    pub root: PathBuf,
    pub mode: ArchiveMode,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("exp_logs"),
            mode: ArchiveMode::ReconciledFile,
        }
    }
}

/// How the remote mirror is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MirrorTransport {
    /// `ssh` + `rsync` to `REMOTE_SYNC_HOST`.
    #[default]
    Rsync,
    /// Plain file copies into a locally mounted path; the host is ignored.
    Local,
}

/// Remote mirror settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub transport: MirrorTransport,
    pub rsync_program: String,
    pub ssh_program: String,
    /// `ssh -o ConnectTimeout`, so an unreachable host stalls a due step for
    /// at most this long. Both ssh and rsync's remote shell run in batch mode.
    pub connect_timeout_secs: u64,
    /// Push once more when the recorder closes so the mirror ends complete.
    pub sync_on_close: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            transport: MirrorTransport::Rsync,
            rsync_program: "rsync".to_string(),
            ssh_program: "ssh".to_string(),
            connect_timeout_secs: 10,
            sync_on_close: true,
        }
    }
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "runlog", "runlog")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".runlog").join("config.toml")
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `RUNLOG_`)
/// 3. Workspace-local config (`.runlog/config.toml`)
/// 4. User config (`~/.config/runlog/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&RunlogConfig>,
) -> Result<RunlogConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(RunlogConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // RUNLOG_LAYOUT__TRAILING_FIELDS, RUNLOG_ARCHIVE__MODE, ...
    figment = figment.merge(Env::prefixed("RUNLOG_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether any runlog configuration file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}
