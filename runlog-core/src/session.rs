//! A training run from recorder open to archive finalize.
//!
//! [`TrainingSession`] closes the recorder and archives the run's logs exactly
//! once, whether the training code returns normally, bails out with `?`, or
//! panics. Partial logs of a failed run are archived too.

use serde::Serialize;

use crate::config::RunlogConfig;
use crate::error::{Result, RunlogError};
use crate::identity::RunIdentity;
use crate::reconcile::{FinalizeReport, LogReconciler};
use crate::recorder::MetricRecorder;
use crate::writer::SessionStatus;

#[derive(Debug)]
pub struct TrainingSession {
    recorder: MetricRecorder,
    reconciler: LogReconciler,
    finished: bool,
}

impl TrainingSession {
    /// Open a recorder for `identity` and prepare to archive into the
    /// configured archive root.
    pub fn start<H>(
        identity: &RunIdentity,
        config: &RunlogConfig,
        hparams: &H,
        expected_metrics: &[&str],
    ) -> Result<Self>
    where
        H: Serialize + ?Sized,
    {
        let recorder = MetricRecorder::open(identity, config, hparams, expected_metrics)?;
        Ok(Self::with_recorder(recorder, LogReconciler::from_config(config)))
    }

    pub fn with_recorder(recorder: MetricRecorder, reconciler: LogReconciler) -> Self {
        Self {
            recorder,
            reconciler,
            finished: false,
        }
    }

    pub fn recorder(&mut self) -> &mut MetricRecorder {
        &mut self.recorder
    }

    /// Close the recorder successfully and archive the run.
    pub fn finish(mut self) -> Result<FinalizeReport> {
        self.complete(SessionStatus::Success)
    }

    /// Close the recorder with a failure status and archive what was written.
    pub fn abort(mut self) -> Result<FinalizeReport> {
        self.complete(SessionStatus::Failure)
    }

    fn complete(&mut self, status: SessionStatus) -> Result<FinalizeReport> {
        self.finished = true;
        let closed = self.recorder.close_with_status(status);
        let log_dir = self.recorder.log_dir().to_path_buf();
        let report = self
            .reconciler
            .finalize(self.recorder.identity(), Some(&log_dir));
        closed?;
        report
    }

    /// Run `train` inside a session. The run is archived on every exit path;
    /// an error from `train` is returned after archiving.
    pub fn run<H, F, T, E>(
        identity: &RunIdentity,
        config: &RunlogConfig,
        hparams: &H,
        expected_metrics: &[&str],
        train: F,
    ) -> std::result::Result<(T, FinalizeReport), E>
    where
        H: Serialize + ?Sized,
        F: FnOnce(&mut MetricRecorder) -> std::result::Result<T, E>,
        E: From<RunlogError>,
    {
        let mut session = Self::start(identity, config, hparams, expected_metrics)?;
        match train(session.recorder()) {
            Ok(value) => Ok((value, session.finish()?)),
            Err(e) => {
                if let Err(finalize_err) = session.abort() {
                    tracing::error!(error = %finalize_err, "failed to archive aborted run");
                }
                Err(e)
            }
        }
    }
}

impl Drop for TrainingSession {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let status = if std::thread::panicking() {
            SessionStatus::Failure
        } else {
            SessionStatus::Success
        };
        match self.complete(status) {
            Ok(report) => tracing::info!(
                event_logs = report.event_logs.len(),
                notices = report.notices.len(),
                "archived run on drop"
            ),
            Err(e) => tracing::error!(error = %e, "failed to archive run on drop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup(tmp: &TempDir) -> (RunIdentity, RunlogConfig) {
        let identity = RunIdentity::new("bert", "nlp", "node07", tmp.path().join("logs"))
            .with_job_id("4821");
        let mut config = RunlogConfig::default();
        config.archive.root = tmp.path().join("exp_logs");
        std::fs::create_dir_all(tmp.path().join("logs").join("slurm")).unwrap();
        std::fs::write(
            tmp.path().join("logs").join("slurm").join("slurm-4821.out"),
            b"epoch 1\n",
        )
        .unwrap();
        (identity, config)
    }

    #[test]
    fn test_finish_archives_event_file_and_scheduler_log() {
        let tmp = TempDir::new().unwrap();
        let (identity, config) = setup(&tmp);
        let mut session = TrainingSession::start(&identity, &config, &json!({"lr": 1e-3}), &[]).unwrap();
        let step = session.recorder().advance_step();
        session.recorder().log_scalar("loss", 2.0, step).unwrap();
        let report = session.finish().unwrap();

        assert_eq!(report.event_logs.len(), 1);
        assert!(report.event_logs[0]
            .destination
            .starts_with(tmp.path().join("exp_logs").join("tensorboard").join("4821_bert")));
        let slurm = report.scheduler_log.unwrap();
        assert_eq!(
            slurm.destination,
            tmp.path()
                .join("exp_logs")
                .join("slurm")
                .join("4821_bert")
                .join("slurm-4821.out")
        );
        assert!(report.notices.is_empty());
    }

    #[test]
    fn test_error_in_training_still_archives() {
        let tmp = TempDir::new().unwrap();
        let (identity, config) = setup(&tmp);
        let result: std::result::Result<((), FinalizeReport), RunlogError> =
            TrainingSession::run(&identity, &config, &json!({}), &["loss"], |rec| {
                rec.advance_step();
                Err(RunlogError::invalid_argument("diverged"))
            });
        assert!(matches!(result, Err(RunlogError::InvalidArgument { .. })));
        assert!(tmp
            .path()
            .join("exp_logs")
            .join("slurm")
            .join("4821_bert")
            .join("slurm-4821.out")
            .is_file());
    }

    #[test]
    fn test_panic_in_training_still_archives() {
        let tmp = TempDir::new().unwrap();
        let (identity, config) = setup(&tmp);
        let session = TrainingSession::start(&identity, &config, &json!({}), &[]).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _session = session;
            panic!("loss is NaN");
        }));
        assert!(result.is_err());
        let archived = tmp.path().join("exp_logs").join("tensorboard").join("4821_bert");
        assert_eq!(std::fs::read_dir(archived).unwrap().count(), 1);
    }
}
