//! Structured event writers.
//!
//! [`MetricRecorder`](crate::recorder::MetricRecorder) wraps any [`EventWriter`];
//! [`TfEventWriter`] produces TensorBoard event files and [`RecordingWriter`]
//! keeps events in memory for tests.

pub mod media;
pub mod memory;
pub mod proto;
pub mod record;
pub mod tfevents;

pub use media::Media;
pub use memory::{RecordingWriter, WrittenEvent};
pub use tfevents::{TfEventWriter, read_events};

use crate::error::Result;
use crate::hparams::HParamsRecord;

/// Outcome reported when a writer is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Success,
    Failure,
}

/// The capability the recorder needs from a structured-event writer.
pub trait EventWriter: Send {
    fn write_scalar(&mut self, tag: &str, value: f32, step: i64) -> Result<()>;

    fn write_media(&mut self, tag: &str, media: &Media<'_>, step: i64) -> Result<()>;

    fn write_hparams(&mut self, record: &HParamsRecord) -> Result<()>;

    /// Push buffered events to the underlying file.
    fn flush(&mut self) -> Result<()>;

    /// Flush and release the writer. Later calls are no-ops.
    fn close(&mut self, status: SessionStatus) -> Result<()>;
}
