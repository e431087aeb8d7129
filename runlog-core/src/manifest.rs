//! Run manifest stored next to the event files.
//!
//! A finalize running in a separate process (after the training process has
//! exited) reads it back to recover the true start timestamp of the run.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

use crate::identity::RunIdentity;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub experiment_name: String,
    pub project_name: String,
    pub host_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub start_timestamp: i64,
}

impl RunManifest {
    pub fn from_identity(identity: &RunIdentity) -> Self {
        Self {
            experiment_name: identity.experiment_name().to_string(),
            project_name: identity.project_name().to_string(),
            host_name: identity.host_name().to_string(),
            job_id: identity.job_id().map(str::to_string),
            start_timestamp: identity.start_timestamp(),
        }
    }
}

/// Atomically write JSON data to a file.
///
/// Writes to a `.tmp` sibling file, then renames to the target path. Creates
/// parent directories if they don't exist.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json.as_bytes())?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load and deserialize JSON from a file.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let value =
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}
