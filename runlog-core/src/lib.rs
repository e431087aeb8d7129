//! # Runlog Core
//!
//! Experiment log recording and reconciliation for training runs.
//! Provides the run identity, a TensorBoard event writer behind a metric
//! recorder, step-driven remote mirroring, and the post-run reconciliation that
//! copies this run's files out of shared log directories into a per-experiment
//! archive.

pub mod archive;
pub mod config;
pub mod error;
pub mod filename;
pub mod hparams;
pub mod identity;
pub mod manifest;
pub mod mirror;
pub mod reconcile;
pub mod recorder;
pub mod session;
pub mod store;
pub mod sync;
pub mod writer;

// Re-export commonly used types at the crate root.
pub use archive::{ArchiveLayout, ArchivedFile};
pub use config::{ArchiveMode, MirrorTransport, RunlogConfig, load_config};
pub use error::{FileNameError, Result, RunlogError, SyncTransportError};
pub use filename::{EventFileLayout, ParsedLogFileName, TimestampPosition};
pub use identity::{MirrorTarget, RunIdentity};
pub use manifest::RunManifest;
pub use mirror::{LocalMirror, PushStats, RemoteMirror, RsyncMirror, mirror_from_config};
pub use reconcile::{FinalizeReport, LogReconciler, Reconciliation, select_closest};
pub use recorder::MetricRecorder;
pub use session::TrainingSession;
pub use store::{EventLogFile, EventLogStore};
pub use sync::{SyncOutcome, SyncScheduler, SyncState};
pub use writer::{EventWriter, Media, RecordingWriter, SessionStatus, TfEventWriter};
