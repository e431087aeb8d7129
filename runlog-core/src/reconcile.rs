//! Post-run reconciliation of shared log directories into the archive.
//!
//! Several runs, possibly on several hosts, write into the same live
//! directories. Event files are matched to this run by the host and creation
//! time embedded in their names; scheduler output is matched by job id. Both
//! operations are idempotent, and "nothing matched" is reported as a notice
//! rather than an error because logs may simply not have been flushed yet.

use chrono::format::{Parsed, StrftimeItems};
use std::fs;
use std::path::{Path, PathBuf};

use crate::archive::{ArchiveLayout, ArchivedFile, copy_into_dir, copy_tree_if_changed};
use crate::config::{ArchiveMode, LiveDirConfig, RunlogConfig, SchedulerLogConfig};
use crate::error::{Result, RunlogError};
use crate::filename::EventFileLayout;
use crate::identity::RunIdentity;
use crate::store::{EventLogFile, EventLogStore};

/// Outcome of a single reconcile step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Archived(ArchivedFile),
    /// Nothing to archive; the notice says why.
    NoMatch(String),
}

impl Reconciliation {
    pub fn archived(&self) -> Option<&ArchivedFile> {
        match self {
            Reconciliation::Archived(file) => Some(file),
            Reconciliation::NoMatch(_) => None,
        }
    }

    pub fn notice(&self) -> Option<&str> {
        match self {
            Reconciliation::Archived(_) => None,
            Reconciliation::NoMatch(notice) => Some(notice),
        }
    }

    fn no_match(notice: String) -> Self {
        tracing::info!("{notice}");
        Reconciliation::NoMatch(notice)
    }
}

/// Everything a finalize did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    pub run_dir: Option<PathBuf>,
    pub event_logs: Vec<ArchivedFile>,
    pub scheduler_log: Option<ArchivedFile>,
    pub notices: Vec<String>,
}

/// Among files whose host contains `host`, the one created closest to `start`.
///
/// Ties go to the earliest candidate in `candidates` order.
pub fn select_closest<'a>(
    candidates: &'a [EventLogFile],
    host: &str,
    start: i64,
) -> Option<&'a EventLogFile> {
    candidates
        .iter()
        .filter(|f| f.created_host.contains(host))
        .min_by_key(|f| f.created_timestamp.abs_diff(start))
}

/// Whether `name` is a run directory of `experiment_name`, i.e.
/// `{stamp}_{experiment_name}` where `stamp` is in `timestamp_format` (or a bare
/// epoch, the fallback for unrepresentable local times). `..._distilbert` and
/// `..._big_bert` are not runs of `bert`.
pub fn is_run_dir_of(name: &str, experiment_name: &str, timestamp_format: &str) -> bool {
    let Some(stamp) = name
        .strip_suffix(experiment_name)
        .and_then(|rest| rest.strip_suffix('_'))
    else {
        return false;
    };
    if stamp.is_empty() {
        return false;
    }
    let mut parsed = Parsed::new();
    chrono::format::parse(&mut parsed, stamp, StrftimeItems::new(timestamp_format)).is_ok()
        || stamp.parse::<i64>().is_ok()
}

/// The lexicographically last run directory of `experiment_name` under
/// `events_root`. Run directories start with a sortable timestamp, so this is
/// the most recent run of the experiment.
pub fn locate_run_dir(
    events_root: &Path,
    experiment_name: &str,
    timestamp_format: &str,
) -> Result<Option<PathBuf>> {
    let entries = match fs::read_dir(events_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut best: Option<(String, PathBuf)> = None;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !is_run_dir_of(&name, experiment_name, timestamp_format) {
            continue;
        }
        if best.as_ref().is_none_or(|(b, _)| name > *b) {
            best = Some((name, entry.path()));
        }
    }
    Ok(best.map(|(_, path)| path))
}

#[derive(Debug, Clone)]
pub struct LogReconciler {
    layout: EventFileLayout,
    live: LiveDirConfig,
    scheduler: SchedulerLogConfig,
    archive: ArchiveLayout,
    mode: ArchiveMode,
}

impl LogReconciler {
    pub fn from_config(config: &RunlogConfig) -> Self {
        Self {
            layout: config.layout.clone(),
            live: config.live.clone(),
            scheduler: config.scheduler.clone(),
            archive: ArchiveLayout::from_config(
                &config.archive,
                &config.live.events_subdir,
                &config.scheduler,
            ),
            mode: config.archive.mode,
        }
    }

    pub fn with_archive_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.archive = ArchiveLayout::new(root, &self.live.events_subdir, &self.scheduler.subdir);
        self
    }

    pub fn with_mode(mut self, mode: ArchiveMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn archive(&self) -> &ArchiveLayout {
        &self.archive
    }

    /// Copy the event file of `log_dir` that belongs to `host_name` and was
    /// created closest to `start_timestamp` into `dest_dir`.
    pub fn reconcile(
        &self,
        log_dir: &Path,
        host_name: &str,
        start_timestamp: i64,
        dest_dir: &Path,
    ) -> Result<Reconciliation> {
        let candidates = EventLogStore::at(log_dir, self.layout.clone()).list()?;
        let Some(winner) = select_closest(&candidates, host_name, start_timestamp) else {
            return Ok(Reconciliation::no_match(format!(
                "no event file for host '{host_name}' in {} ({} candidates)",
                log_dir.display(),
                candidates.len()
            )));
        };
        tracing::debug!(
            file = winner.file_name(),
            created = winner.created_timestamp,
            start = start_timestamp,
            "selected event file"
        );
        Ok(Reconciliation::Archived(copy_into_dir(&winner.path, dest_dir)?))
    }

    /// The job id embedded in a scheduler output file name, if it follows
    /// `<prefix>-<jobId>.<extension>`.
    pub fn parse_scheduler_log_name<'a>(&self, name: &'a str) -> Option<&'a str> {
        let id = name
            .strip_prefix(self.scheduler.prefix.as_str())?
            .strip_prefix('-')?
            .strip_suffix(self.scheduler.extension.as_str())?
            .strip_suffix('.')?;
        (!id.is_empty()).then_some(id)
    }

    /// Copy the scheduler output of `job_id` from `source_dir` into `dest_dir`.
    ///
    /// `dest_dir` must be named after the experiment; anything else means the
    /// caller is about to write into another run's archive.
    pub fn reconcile_scheduler_log(
        &self,
        source_dir: &Path,
        job_id: Option<&str>,
        dest_dir: &Path,
        experiment_name: &str,
    ) -> Result<Reconciliation> {
        let dest_name = dest_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if experiment_name.is_empty() || !dest_name.ends_with(experiment_name) {
            return Err(RunlogError::invalid_argument(format!(
                "destination '{}' is not named after experiment '{experiment_name}'",
                dest_dir.display()
            )));
        }
        let Some(job_id) = job_id else {
            return Ok(Reconciliation::no_match(
                "no scheduler job id; skipping scheduler log".to_string(),
            ));
        };

        let entries = match fs::read_dir(source_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Reconciliation::no_match(format!(
                    "scheduler log directory {} does not exist",
                    source_dir.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let mut matches = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if self.parse_scheduler_log_name(&name) == Some(job_id) && entry.file_type()?.is_file()
            {
                matches.push(entry.path());
            }
        }
        matches.sort();

        match matches.first() {
            Some(path) => Ok(Reconciliation::Archived(copy_into_dir(path, dest_dir)?)),
            None => Ok(Reconciliation::no_match(format!(
                "no scheduler log for job {job_id} in {}",
                source_dir.display()
            ))),
        }
    }

    /// Archive this run's event logs and scheduler output.
    ///
    /// `run_dir` defaults to the most recent run directory of the experiment.
    pub fn finalize(&self, identity: &RunIdentity, run_dir: Option<&Path>) -> Result<FinalizeReport> {
        let entry = identity.archive_entry_name();
        let mut report = FinalizeReport::default();

        let run_dir = match run_dir {
            Some(dir) => Some(dir.to_path_buf()),
            None => locate_run_dir(
                &identity.events_root(&self.live),
                identity.experiment_name(),
                &self.live.timestamp_format,
            )?,
        };
        match &run_dir {
            Some(dir) => {
                let dest = self.archive.events_dir(&entry);
                match self.mode {
                    ArchiveMode::ReconciledFile => {
                        let outcome = self.reconcile(
                            dir,
                            identity.host_name(),
                            identity.start_timestamp(),
                            &dest,
                        )?;
                        match outcome {
                            Reconciliation::Archived(file) => report.event_logs.push(file),
                            Reconciliation::NoMatch(notice) => report.notices.push(notice),
                        }
                    }
                    ArchiveMode::WholeRunDir => {
                        let files = copy_tree_if_changed(dir, &dest)?;
                        if files.is_empty() {
                            report
                                .notices
                                .push(format!("run directory {} is empty", dir.display()));
                        }
                        report.event_logs = files;
                    }
                }
            }
            None => {
                let notice = format!(
                    "no run directory ending with '{}' under {}",
                    identity.experiment_name(),
                    identity.events_root(&self.live).display()
                );
                tracing::info!("{notice}");
                report.notices.push(notice);
            }
        }
        report.run_dir = run_dir;

        let scheduler_source = identity.logs_root().join(&self.scheduler.subdir);
        let outcome = self.reconcile_scheduler_log(
            &scheduler_source,
            identity.job_id(),
            &self.archive.scheduler_dir(&entry),
            identity.experiment_name(),
        )?;
        match outcome {
            Reconciliation::Archived(file) => report.scheduler_log = Some(file),
            Reconciliation::NoMatch(notice) => report.notices.push(notice),
        }

        tracing::info!(
            experiment = identity.experiment_name(),
            event_logs = report.event_logs.len(),
            scheduler_log = report.scheduler_log.is_some(),
            notices = report.notices.len(),
            "finalize complete"
        );
        Ok(report)
    }
}
