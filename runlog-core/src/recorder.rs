//! Metric recording façade over an [`EventWriter`].
//!
//! The recorder owns the step counter. Every [`MetricRecorder::advance_step`]
//! is reported to the [`SyncScheduler`], which is the only place remote pushes
//! start from. Closing happens exactly once: explicitly through
//! [`MetricRecorder::close`], or from `Drop` on any other exit path.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::RunlogConfig;
use crate::error::{Result, RunlogError};
use crate::hparams::{self, HParamsRecord};
use crate::identity::{RunIdentity, datetime_from_log_dir};
use crate::manifest::{RunManifest, atomic_write_json};
use crate::mirror::mirror_from_config;
use crate::store::EventLogStore;
use crate::sync::{SyncOutcome, SyncScheduler};
use crate::writer::{EventWriter, Media, SessionStatus, TfEventWriter};

pub struct MetricRecorder {
    identity: RunIdentity,
    log_dir: PathBuf,
    writer: Box<dyn EventWriter>,
    scheduler: SyncScheduler,
    step: u64,
    sync_on_close: bool,
    closed: bool,
}

impl std::fmt::Debug for MetricRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricRecorder")
            .field("log_dir", &self.log_dir)
            .field("step", &self.step)
            .field("scheduler", &self.scheduler)
            .field("closed", &self.closed)
            .finish()
    }
}

impl MetricRecorder {
    /// Open the run's live log directory and a TensorBoard event writer in it,
    /// then emit the hyperparameter record and the run manifest.
    ///
    /// `hparams` must serialize to a mapping whose flattened key paths are
    /// unique; anything else fails before any directory or file is created.
    pub fn open<H>(
        identity: &RunIdentity,
        config: &RunlogConfig,
        hparams: &H,
        expected_metrics: &[&str],
    ) -> Result<Self>
    where
        H: Serialize + ?Sized,
    {
        let flat = hparams::flatten(&hparams::to_mapping(hparams)?)?;
        let log_dir = identity.live_log_dir(&config.live);
        let store = EventLogStore::open(&log_dir, config.layout.clone())?;
        atomic_write_json(
            &log_dir.join(&config.live.manifest_name),
            &RunManifest::from_identity(identity),
        )?;
        let writer = TfEventWriter::create(store.dir(), identity.host_name(), store.layout())?;
        tracing::info!(
            experiment = identity.experiment_name(),
            log_dir = %log_dir.display(),
            file = %writer.path().display(),
            "recorder opened"
        );

        let scheduler = SyncScheduler::for_identity(identity, mirror_from_config(&config.mirror));
        let mut recorder =
            Self::from_parts(identity, log_dir, Box::new(writer), scheduler, &flat, expected_metrics)?;
        recorder.sync_on_close = config.mirror.sync_on_close;
        Ok(recorder)
    }

    /// Build a recorder around an already opened writer.
    pub fn with_writer<H>(
        identity: &RunIdentity,
        log_dir: impl Into<PathBuf>,
        writer: Box<dyn EventWriter>,
        scheduler: SyncScheduler,
        hparams: &H,
        expected_metrics: &[&str],
    ) -> Result<Self>
    where
        H: Serialize + ?Sized,
    {
        let flat = hparams::flatten(&hparams::to_mapping(hparams)?)?;
        let log_dir = log_dir.into();
        std::fs::create_dir_all(&log_dir)?;
        Self::from_parts(identity, log_dir, writer, scheduler, &flat, expected_metrics)
    }

    fn from_parts(
        identity: &RunIdentity,
        log_dir: PathBuf,
        mut writer: Box<dyn EventWriter>,
        scheduler: SyncScheduler,
        flat_hparams: &serde_json::Map<String, serde_json::Value>,
        expected_metrics: &[&str],
    ) -> Result<Self> {
        let record = Self::hparams_record(&log_dir, flat_hparams, expected_metrics);
        writer.write_hparams(&record)?;
        Ok(Self {
            identity: identity.clone(),
            log_dir,
            writer,
            scheduler,
            step: 0,
            sync_on_close: true,
            closed: false,
        })
    }

    fn hparams_record(
        log_dir: &Path,
        flat_hparams: &serde_json::Map<String, serde_json::Value>,
        expected_metrics: &[&str],
    ) -> HParamsRecord {
        let run_name = log_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        hparams::build_record(
            flat_hparams,
            &datetime_from_log_dir(log_dir),
            expected_metrics,
            &run_name,
        )
    }

    pub fn set_sync_on_close(&mut self, enabled: bool) {
        self.sync_on_close = enabled;
    }

    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn current_step(&self) -> u64 {
        self.step
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(RunlogError::writer("recorder is closed"));
        }
        Ok(())
    }

    /// Buffered; does not touch the disk on every call.
    pub fn log_scalar(&mut self, name: &str, value: f64, step: u64) -> Result<()> {
        self.ensure_open()?;
        self.writer.write_scalar(name, value as f32, step_to_i64(step))
    }

    pub fn log_media(&mut self, name: &str, media: &Media<'_>, step: u64) -> Result<()> {
        self.ensure_open()?;
        self.writer.write_media(name, media, step_to_i64(step))
    }

    /// Increment the global step and let the scheduler decide on a push.
    pub fn advance_step(&mut self) -> u64 {
        self.step += 1;
        if !self.closed {
            let outcome = self
                .scheduler
                .on_step(self.step, self.writer.as_mut(), &self.log_dir);
            if let SyncOutcome::Failed(reason) = outcome {
                tracing::debug!(step = self.step, %reason, "continuing after failed sync");
            }
        }
        self.step
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()
    }

    /// Flush and release the writer with a successful status.
    pub fn close(mut self) -> Result<()> {
        self.close_with_status(SessionStatus::Success)
    }

    /// Close with an explicit status. Later calls are no-ops.
    pub fn close_with_status(&mut self, status: SessionStatus) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.writer.close(status);
        if self.sync_on_close && self.scheduler.is_enabled() {
            self.scheduler.sync_after_close(&self.log_dir);
        }
        tracing::info!(
            experiment = self.identity.experiment_name(),
            steps = self.step,
            ?status,
            "recorder closed"
        );
        result
    }
}

impl Drop for MetricRecorder {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let status = if std::thread::panicking() {
            SessionStatus::Failure
        } else {
            SessionStatus::Success
        };
        if let Err(e) = self.close_with_status(status) {
            tracing::error!(error = %e, "failed to close recorder");
        }
    }
}

fn step_to_i64(step: u64) -> i64 {
    i64::try_from(step).unwrap_or(i64::MAX)
}
