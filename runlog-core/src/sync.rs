//! Step-driven scheduling of remote mirror pushes.
//!
//! The scheduler is `Idle` between due steps. When an observed step is a
//! positive multiple of the interval it moves to `SyncDue`, flushes the writer,
//! pushes, and returns to `Idle` whatever the push outcome. Transport failures
//! are logged and never reach the training loop.

use std::path::Path;

use crate::error::SyncTransportError;
use crate::identity::{MirrorTarget, RunIdentity};
use crate::mirror::{PushStats, RemoteMirror};
use crate::writer::EventWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    SyncDue,
}

/// Result of observing one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Not a sync step, or syncing is disabled.
    Skipped,
    Pushed(PushStats),
    /// The push was attempted and failed; training continues.
    Failed(String),
}

/// Whether `step` triggers a sync for `interval`.
pub fn is_due(interval: u64, step: u64) -> bool {
    interval > 0 && step > 0 && step % interval == 0
}

pub struct SyncScheduler {
    interval: u64,
    current_step: u64,
    last_sync_step: u64,
    state: SyncState,
    mirror: Option<(Box<dyn RemoteMirror>, MirrorTarget)>,
    remote_prepared: bool,
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("interval", &self.interval)
            .field("current_step", &self.current_step)
            .field("last_sync_step", &self.last_sync_step)
            .field("state", &self.state)
            .field("target", &self.mirror.as_ref().map(|(_, t)| t))
            .finish()
    }
}

impl SyncScheduler {
    pub fn new(interval: u64, mirror: Box<dyn RemoteMirror>, target: MirrorTarget) -> Self {
        Self {
            interval,
            current_step: 0,
            last_sync_step: 0,
            state: SyncState::Idle,
            mirror: Some((mirror, target)),
            remote_prepared: false,
        }
    }

    /// A scheduler that never fires.
    pub fn disabled() -> Self {
        Self {
            interval: 0,
            current_step: 0,
            last_sync_step: 0,
            state: SyncState::Idle,
            mirror: None,
            remote_prepared: false,
        }
    }

    /// Enabled when the identity carries both an interval and a target.
    pub fn for_identity(identity: &RunIdentity, mirror: Box<dyn RemoteMirror>) -> Self {
        match identity.mirror() {
            Some(target) if identity.sync_interval_steps() > 0 => {
                Self::new(identity.sync_interval_steps(), mirror, target.clone())
            }
            _ => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval > 0 && self.mirror.is_some()
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    pub fn last_sync_step(&self) -> u64 {
        self.last_sync_step
    }

    /// Observe a step advance and push when due.
    pub fn on_step(
        &mut self,
        step: u64,
        writer: &mut dyn EventWriter,
        local_dir: &Path,
    ) -> SyncOutcome {
        self.current_step = step;
        if !self.is_enabled() || !is_due(self.interval, step) {
            return SyncOutcome::Skipped;
        }
        self.state = SyncState::SyncDue;
        let outcome = self.flush_and_push(writer, local_dir);
        self.last_sync_step = step;
        self.state = SyncState::Idle;
        outcome
    }

    /// Push regardless of the step, e.g. once more at close.
    pub fn sync_now(&mut self, writer: &mut dyn EventWriter, local_dir: &Path) -> SyncOutcome {
        if self.mirror.is_none() {
            return SyncOutcome::Skipped;
        }
        let outcome = self.flush_and_push(writer, local_dir);
        self.last_sync_step = self.current_step;
        outcome
    }

    /// Push once more after the writer is closed. A closed writer has already
    /// flushed everything, so it is not touched.
    pub fn sync_after_close(&mut self, local_dir: &Path) -> SyncOutcome {
        if self.mirror.is_none() {
            return SyncOutcome::Skipped;
        }
        let outcome = self.push_logged(local_dir);
        self.last_sync_step = self.current_step;
        outcome
    }

    fn flush_and_push(&mut self, writer: &mut dyn EventWriter, local_dir: &Path) -> SyncOutcome {
        if let Err(e) = writer.flush() {
            tracing::warn!(step = self.current_step, error = %e, "flush before sync failed");
        }
        self.push_logged(local_dir)
    }

    fn push_logged(&mut self, local_dir: &Path) -> SyncOutcome {
        match self.push(local_dir) {
            Ok(stats) => {
                tracing::info!(
                    step = self.current_step,
                    files = stats.files_transferred,
                    bytes = stats.bytes_transferred,
                    "mirrored logs"
                );
                SyncOutcome::Pushed(stats)
            }
            Err(e) => {
                tracing::warn!(step = self.current_step, error = %e, "remote sync failed");
                SyncOutcome::Failed(e.to_string())
            }
        }
    }

    fn push(&mut self, local_dir: &Path) -> Result<PushStats, SyncTransportError> {
        let Some((mirror, target)) = self.mirror.as_mut() else {
            return Ok(PushStats::default());
        };
        if !self.remote_prepared {
            mirror.ensure_remote_dir(target)?;
            self.remote_prepared = true;
        }
        mirror.push(local_dir, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{RecordingWriter, WrittenEvent};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Calls {
        mkdirs: usize,
        pushes: Vec<String>,
    }

    /// Records calls; fails the first `fail_mkdirs` directory creations.
    struct FakeMirror {
        calls: Arc<Mutex<Calls>>,
        fail_mkdirs: usize,
    }

    impl RemoteMirror for FakeMirror {
        fn ensure_remote_dir(&mut self, _: &MirrorTarget) -> Result<(), SyncTransportError> {
            let mut calls = self.calls.lock().unwrap();
            calls.mkdirs += 1;
            if calls.mkdirs <= self.fail_mkdirs {
                return Err(SyncTransportError::CommandFailed {
                    program: "ssh".into(),
                    code: Some(255),
                    stderr: "connection refused".into(),
                });
            }
            Ok(())
        }

        fn push(&mut self, dir: &Path, _: &MirrorTarget) -> Result<PushStats, SyncTransportError> {
            self.calls
                .lock()
                .unwrap()
                .pushes
                .push(dir.display().to_string());
            Ok(PushStats {
                files_transferred: 1,
                bytes_transferred: 10,
            })
        }
    }

    fn scheduler(interval: u64, fail_mkdirs: usize) -> (SyncScheduler, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let mirror = FakeMirror {
            calls: calls.clone(),
            fail_mkdirs,
        };
        let target = MirrorTarget::new("login01", "/remote");
        (SyncScheduler::new(interval, Box::new(mirror), target), calls)
    }

    #[test]
    fn test_is_due() {
        assert!(!is_due(0, 0));
        assert!(!is_due(0, 10));
        assert!(!is_due(5, 0));
        assert!(!is_due(5, 4));
        assert!(is_due(5, 5));
        assert!(is_due(5, 10));
        assert!(is_due(1, 1));
    }

    #[test]
    fn test_fires_on_multiples_and_flushes_first() {
        let (mut sched, calls) = scheduler(3, 0);
        let mut writer = RecordingWriter::new();
        let fired: Vec<u64> = (1..=9)
            .filter(|&step| {
                matches!(
                    sched.on_step(step, &mut writer, Path::new("/live/run")),
                    SyncOutcome::Pushed(_)
                )
            })
            .collect();
        assert_eq!(fired, vec![3, 6, 9]);
        assert_eq!(calls.lock().unwrap().pushes.len(), 3);
        assert_eq!(calls.lock().unwrap().mkdirs, 1);
        assert_eq!(writer.flush_count(), 3);
        assert_eq!(sched.last_sync_step(), 9);
        assert_eq!(sched.state(), SyncState::Idle);
    }

    #[test]
    fn test_failure_is_swallowed_and_mkdir_retried() {
        let (mut sched, calls) = scheduler(2, 1);
        let mut writer = RecordingWriter::new();
        let dir = Path::new("/live/run");
        assert!(matches!(
            sched.on_step(2, &mut writer, dir),
            SyncOutcome::Failed(msg) if msg.contains("connection refused")
        ));
        assert_eq!(sched.state(), SyncState::Idle);
        assert!(matches!(
            sched.on_step(4, &mut writer, dir),
            SyncOutcome::Pushed(_)
        ));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.mkdirs, 2);
        assert_eq!(calls.pushes, vec!["/live/run"]);
    }

    #[test]
    fn test_sync_after_close_pushes_without_flushing() {
        let (mut sched, calls) = scheduler(10, 0);
        let mut writer = RecordingWriter::new();
        sched.on_step(7, &mut writer, Path::new("/live/run"));
        assert!(matches!(
            sched.sync_after_close(Path::new("/live/run")),
            SyncOutcome::Pushed(_)
        ));
        assert_eq!(sched.last_sync_step(), 7);
        assert_eq!(calls.lock().unwrap().pushes, vec!["/live/run"]);
        assert_eq!(writer.flush_count(), 0);
        assert_eq!(
            SyncScheduler::disabled().sync_after_close(Path::new("/x")),
            SyncOutcome::Skipped
        );
    }

    #[test]
    fn test_disabled_never_fires() {
        let mut sched = SyncScheduler::disabled();
        let mut writer = RecordingWriter::new();
        for step in 0..100 {
            assert_eq!(
                sched.on_step(step, &mut writer, Path::new("/x")),
                SyncOutcome::Skipped
            );
        }
        assert_eq!(sched.sync_now(&mut writer, Path::new("/x")), SyncOutcome::Skipped);
        assert!(!writer.events().contains(&WrittenEvent::Flush));
    }

    #[test]
    fn test_zero_interval_with_mirror_never_fires() {
        let (mut sched, calls) = scheduler(0, 0);
        let mut writer = RecordingWriter::new();
        for step in 0..20 {
            sched.on_step(step, &mut writer, Path::new("/x"));
        }
        assert!(calls.lock().unwrap().pushes.is_empty());
    }

    #[test]
    fn test_for_identity() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let mirror = || -> Box<dyn RemoteMirror> {
            Box::new(FakeMirror {
                calls: calls.clone(),
                fail_mkdirs: 0,
            })
        };
        let plain = RunIdentity::new("exp", "proj", "node07", "/logs");
        assert!(!SyncScheduler::for_identity(&plain, mirror()).is_enabled());

        let synced = plain.with_sync(50, MirrorTarget::new("h", "/r"));
        let sched = SyncScheduler::for_identity(&synced, mirror());
        assert!(sched.is_enabled());
        assert_eq!(sched.interval(), 50);
    }
}
