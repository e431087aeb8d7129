use std::sync::{Arc, Mutex, MutexGuard};

use super::media::Media;
use super::{EventWriter, SessionStatus};
use crate::error::{Result, RunlogError};
use crate::hparams::HParamsRecord;

/// An event captured by [`RecordingWriter`].
#[derive(Debug, Clone, PartialEq)]
pub enum WrittenEvent {
    Scalar { tag: String, value: f32, step: i64 },
    Media { tag: String, kind: &'static str, step: i64 },
    HParams(HParamsRecord),
    Flush,
    Close(SessionStatus),
}

/// In-memory writer; clones share the same event log.
#[derive(Debug, Clone, Default)]
pub struct RecordingWriter {
    events: Arc<Mutex<Vec<WrittenEvent>>>,
    closed: bool,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<WrittenEvent> {
        self.lock().map(|events| events.clone()).unwrap_or_default()
    }

    pub fn scalars(&self, tag: &str) -> Vec<(i64, f32)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                WrittenEvent::Scalar { tag: t, value, step } if t == tag => Some((step, value)),
                _ => None,
            })
            .collect()
    }

    pub fn flush_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, WrittenEvent::Flush))
            .count()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<WrittenEvent>>> {
        self.events
            .lock()
            .map_err(|_| RunlogError::writer("recording writer lock poisoned"))
    }

    fn push(&mut self, event: WrittenEvent) -> Result<()> {
        if self.closed {
            return Err(RunlogError::writer("recording writer is already closed"));
        }
        self.lock()?.push(event);
        Ok(())
    }
}

impl EventWriter for RecordingWriter {
    fn write_scalar(&mut self, tag: &str, value: f32, step: i64) -> Result<()> {
        self.push(WrittenEvent::Scalar {
            tag: tag.to_string(),
            value,
            step,
        })
    }

    fn write_media(&mut self, tag: &str, media: &Media<'_>, step: i64) -> Result<()> {
        self.push(WrittenEvent::Media {
            tag: tag.to_string(),
            kind: media.kind(),
            step,
        })
    }

    fn write_hparams(&mut self, record: &HParamsRecord) -> Result<()> {
        self.push(WrittenEvent::HParams(record.clone()))
    }

    fn flush(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.push(WrittenEvent::Flush)
    }

    fn close(&mut self, status: SessionStatus) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.push(WrittenEvent::Close(status))?;
        self.closed = true;
        Ok(())
    }
}
