//! Run identity, resolved once at startup.
//!
//! Every other component receives a `&RunIdentity` instead of reading the
//! process environment itself. Tests build identities directly with
//! [`RunIdentity::new`] and the `with_*` builders, or resolve them from an
//! in-memory map through [`RunIdentity::from_lookup`].

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::LiveDirConfig;
use crate::error::{Result, RunlogError};

pub const LOGS_ROOT_DIR: &str = "LOGS_ROOT_DIR";
pub const PROJECT_NAME: &str = "PROJECT_NAME";
pub const EXPERIMENT_NAME: &str = "EXPERIMENT_NAME";
pub const SYNC_INTERVAL_STEPS: &str = "SYNC_INTERVAL_STEPS";
pub const REMOTE_SYNC_HOST: &str = "REMOTE_SYNC_HOST";
pub const REMOTE_LOGS_ROOT_DIR: &str = "REMOTE_LOGS_ROOT_DIR";
pub const SCHEDULER_JOB_ID: &str = "SCHEDULER_JOB_ID";
/// Read when `SCHEDULER_JOB_ID` is unset.
pub const SLURM_JOB_ID: &str = "SLURM_JOB_ID";

/// Remote host and directory the live log tree is mirrored to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorTarget {
    pub host: String,
    pub path: PathBuf,
}

impl MirrorTarget {
    pub fn new(host: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
        }
    }

    /// `host:path` as understood by rsync.
    pub fn rsync_destination(&self) -> String {
        format!("{}:{}", self.host, self.path.display())
    }
}

/// Stable identifiers of the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    experiment_name: String,
    project_name: String,
    host_name: String,
    job_id: Option<String>,
    start_timestamp: i64,
    logs_root: PathBuf,
    sync_interval_steps: u64,
    mirror: Option<MirrorTarget>,
}

impl RunIdentity {
    /// Identity with the required fields; optional features start disabled and
    /// the start timestamp is "now".
    pub fn new(
        experiment_name: impl Into<String>,
        project_name: impl Into<String>,
        host_name: impl Into<String>,
        logs_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            experiment_name: experiment_name.into(),
            project_name: project_name.into(),
            host_name: host_name.into(),
            job_id: None,
            start_timestamp: chrono::Utc::now().timestamp(),
            logs_root: logs_root.into(),
            sync_interval_steps: 0,
            mirror: None,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_start_timestamp(mut self, start_timestamp: i64) -> Self {
        self.start_timestamp = start_timestamp;
        self
    }

    pub fn with_sync(mut self, interval_steps: u64, mirror: MirrorTarget) -> Self {
        self.sync_interval_steps = interval_steps;
        self.mirror = Some(mirror);
        self
    }

    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary key lookup. Empty values count as absent.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| get(key).ok_or_else(|| RunlogError::missing_config(key));

        let logs_root = PathBuf::from(require(LOGS_ROOT_DIR)?);
        let project_name = require(PROJECT_NAME)?;
        let experiment_name = require(EXPERIMENT_NAME)?;

        let sync_interval_steps = match get(SYNC_INTERVAL_STEPS) {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                RunlogError::invalid_argument(format!(
                    "{SYNC_INTERVAL_STEPS} must be a non-negative integer, got '{raw}'"
                ))
            })?,
            None => 0,
        };

        let mirror = match (get(REMOTE_SYNC_HOST), get(REMOTE_LOGS_ROOT_DIR)) {
            (Some(host), Some(root)) => Some(MirrorTarget::new(
                host,
                remote_events_path(Path::new(&root), &project_name),
            )),
            _ => None,
        };
        if sync_interval_steps > 0 && mirror.is_none() {
            tracing::warn!(
                interval = sync_interval_steps,
                "{SYNC_INTERVAL_STEPS} is set but {REMOTE_SYNC_HOST}/{REMOTE_LOGS_ROOT_DIR} are not; remote sync disabled"
            );
        }

        let job_id = get(SCHEDULER_JOB_ID).or_else(|| get(SLURM_JOB_ID));
        let host_name = local_host_name()?;

        let identity = Self {
            experiment_name,
            project_name,
            host_name,
            job_id,
            start_timestamp: chrono::Utc::now().timestamp(),
            logs_root,
            sync_interval_steps: if mirror.is_some() {
                sync_interval_steps
            } else {
                0
            },
            mirror,
        };
        tracing::debug!(
            experiment = %identity.experiment_name,
            host = %identity.host_name,
            job_id = ?identity.job_id,
            start = identity.start_timestamp,
            "resolved run identity"
        );
        Ok(identity)
    }

    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn start_timestamp(&self) -> i64 {
        self.start_timestamp
    }

    pub fn logs_root(&self) -> &Path {
        &self.logs_root
    }

    /// Steps between mirror pushes; 0 when syncing is disabled.
    pub fn sync_interval_steps(&self) -> u64 {
        self.sync_interval_steps
    }

    pub fn mirror(&self) -> Option<&MirrorTarget> {
        self.mirror.as_ref()
    }

    /// Directory under the logs root that holds one directory per run.
    pub fn events_root(&self, live: &LiveDirConfig) -> PathBuf {
        self.logs_root.join(&live.events_subdir)
    }

    /// `{stamp}_{experiment}` for this run's start time.
    pub fn run_dir_name(&self, live: &LiveDirConfig) -> String {
        let stamp = Local
            .timestamp_opt(self.start_timestamp, 0)
            .single()
            .map(|dt| dt.format(&live.timestamp_format).to_string())
            .unwrap_or_else(|| self.start_timestamp.to_string());
        format!("{stamp}_{}", self.experiment_name)
    }

    /// `{LOGS_ROOT_DIR}/{events_subdir}/{stamp}_{experiment}`.
    pub fn live_log_dir(&self, live: &LiveDirConfig) -> PathBuf {
        self.events_root(live).join(self.run_dir_name(live))
    }

    /// Archive entry name; always ends with the experiment name.
    pub fn archive_entry_name(&self) -> String {
        match &self.job_id {
            Some(job_id) => format!("{job_id}_{}", self.experiment_name),
            None => self.experiment_name.clone(),
        }
    }
}

/// `{remote_root}/{project}/logs/tensorboard`.
pub fn remote_events_path(remote_root: &Path, project_name: &str) -> PathBuf {
    remote_root.join(project_name).join("logs").join("tensorboard")
}

/// The text before the first `_` of a run directory name.
pub fn datetime_from_log_dir(log_dir: &Path) -> String {
    log_dir
        .file_name()
        .and_then(|n| n.to_str())
        .map(|name| name.split('_').next().unwrap_or(name).to_string())
        .unwrap_or_default()
}

fn local_host_name() -> Result<String> {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| RunlogError::missing_config("host name"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        (LOGS_ROOT_DIR, "/shared/logs"),
        (PROJECT_NAME, "audio-fx"),
        (EXPERIMENT_NAME, "exp_1700000000"),
    ];

    #[test]
    fn test_missing_required_values_fail_fast() {
        for skip in 0..REQUIRED.len() {
            let pairs: Vec<_> = REQUIRED
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, p)| *p)
                .collect();
            let err = RunIdentity::from_lookup(lookup(&pairs)).unwrap_err();
            match err {
                RunlogError::MissingConfig { var } => assert_eq!(var, REQUIRED[skip].0),
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs[2] = (EXPERIMENT_NAME, "  ");
        let err = RunIdentity::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, RunlogError::MissingConfig { .. }));
    }

    #[test]
    fn test_optional_values_disable_features() {
        let identity = RunIdentity::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(identity.experiment_name(), "exp_1700000000");
        assert_eq!(identity.job_id(), None);
        assert_eq!(identity.sync_interval_steps(), 0);
        assert!(identity.mirror().is_none());
        assert!(!identity.host_name().is_empty());
    }

    #[test]
    fn test_sync_requires_remote_target() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push((SYNC_INTERVAL_STEPS, "50"));
        let identity = RunIdentity::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(identity.sync_interval_steps(), 0);

        pairs.push((REMOTE_SYNC_HOST, "tb.example.org"));
        pairs.push((REMOTE_LOGS_ROOT_DIR, "/srv/tensorboard"));
        let identity = RunIdentity::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(identity.sync_interval_steps(), 50);
        let mirror = identity.mirror().unwrap();
        assert_eq!(mirror.host, "tb.example.org");
        assert_eq!(
            mirror.path,
            PathBuf::from("/srv/tensorboard/audio-fx/logs/tensorboard")
        );
        assert_eq!(
            mirror.rsync_destination(),
            "tb.example.org:/srv/tensorboard/audio-fx/logs/tensorboard"
        );
    }

    #[test]
    fn test_invalid_sync_interval() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push((SYNC_INTERVAL_STEPS, "often"));
        let err = RunIdentity::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, RunlogError::InvalidArgument { .. }));
    }

    #[test]
    fn test_job_id_falls_back_to_slurm() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push((SLURM_JOB_ID, "4821"));
        let identity = RunIdentity::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(identity.job_id(), Some("4821"));

        pairs.push((SCHEDULER_JOB_ID, "9000"));
        let identity = RunIdentity::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(identity.job_id(), Some("9000"));
    }

    #[test]
    fn test_live_log_dir_and_datetime() {
        let identity = RunIdentity::new("exp_a", "proj", "node07", "/logs")
            .with_start_timestamp(1_700_000_000);
        let live = LiveDirConfig::default();
        let dir = identity.live_log_dir(&live);
        assert!(dir.starts_with("/logs/tensorboard"));
        let name = dir.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_exp_a"));

        let datetime = datetime_from_log_dir(&dir);
        assert_eq!(datetime.len(), "20231114-2213".len());
        assert_eq!(format!("{datetime}_exp_a"), name);
    }

    #[test]
    fn test_archive_entry_name_ends_with_experiment() {
        let identity = RunIdentity::new("exp_a", "proj", "node07", "/logs");
        assert_eq!(identity.archive_entry_name(), "exp_a");
        let identity = identity.with_job_id("4821");
        assert_eq!(identity.archive_entry_name(), "4821_exp_a");
    }
}
