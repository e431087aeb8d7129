//! Discovery of event files in a local log directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::filename::EventFileLayout;

/// An event file whose name parsed against the configured layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLogFile {
    pub path: PathBuf,
    pub created_host: String,
    pub created_timestamp: i64,
    pub size_bytes: u64,
}

impl EventLogFile {
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// A directory of event files, possibly shared by several concurrent runs.
#[derive(Debug, Clone)]
pub struct EventLogStore {
    dir: PathBuf,
    layout: EventFileLayout,
}

impl EventLogStore {
    /// Create the directory if absent and return a store over it.
    ///
    /// Safe to race with other processes creating the same directory.
    pub fn open(dir: impl Into<PathBuf>, layout: EventFileLayout) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, layout })
    }

    /// A store over `dir` without touching the filesystem.
    pub fn at(dir: impl Into<PathBuf>, layout: EventFileLayout) -> Self {
        Self {
            dir: dir.into(),
            layout,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn layout(&self) -> &EventFileLayout {
        &self.layout
    }

    /// Event files directly inside the directory, sorted by file name.
    ///
    /// A missing directory yields an empty list. Files whose name does not
    /// follow the layout are skipped.
    pub fn list(&self) -> Result<Vec<EventLogFile>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name();
            match self.layout.parse_os(&name) {
                Ok(parsed) => files.push(EventLogFile {
                    path: entry.path(),
                    created_host: parsed.host,
                    created_timestamp: parsed.timestamp,
                    size_bytes: metadata.len(),
                }),
                Err(e) => {
                    tracing::debug!(file = ?name, reason = %e, "skipping non-event file");
                }
            }
        }
        files.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
        Ok(files)
    }

    /// Files whose parsed host contains `host`.
    pub fn list_for_host(&self, host: &str) -> Result<Vec<EventLogFile>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|f| f.created_host.contains(host))
            .collect())
    }
}
