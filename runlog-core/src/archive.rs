//! Permanent per-experiment archive and idempotent copies.
//!
//! Copies compare length and SHA-256 before touching the destination, and write
//! through a temporary sibling that is renamed into place, so re-running a
//! finalize never rewrites identical files and an interrupted copy never leaves
//! a truncated file under the final name.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use crate::config::{ArchiveConfig, SchedulerLogConfig};
use crate::error::Result;

/// A file placed into the archive (or found already there).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedFile {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// `false` when an identical copy was already present.
    pub copied: bool,
}

/// Directory layout under the archive root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    root: PathBuf,
    events_subdir: String,
    scheduler_subdir: String,
}

impl ArchiveLayout {
    pub fn new(
        root: impl Into<PathBuf>,
        events_subdir: impl Into<String>,
        scheduler_subdir: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            events_subdir: events_subdir.into(),
            scheduler_subdir: scheduler_subdir.into(),
        }
    }

    /// Layout rooted at `archive.root`, mirroring the live tree's sub-directory names.
    pub fn from_config(
        archive: &ArchiveConfig,
        events_subdir: &str,
        scheduler: &SchedulerLogConfig,
    ) -> Self {
        Self::new(&archive.root, events_subdir, &scheduler.subdir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/tensorboard/<entry>`
    pub fn events_dir(&self, entry: &str) -> PathBuf {
        self.root.join(&self.events_subdir).join(entry)
    }

    /// `<root>/slurm/<entry>`
    pub fn scheduler_dir(&self, entry: &str) -> PathBuf {
        self.root.join(&self.scheduler_subdir).join(entry)
    }
}

fn sha256_file(path: &Path) -> io::Result<Vec<u8>> {
    let mut hasher = Sha256::new();
    io::copy(&mut BufReader::new(File::open(path)?), &mut hasher)?;
    Ok(hasher.finalize().to_vec())
}

fn same_contents(a: &Path, b: &Path) -> io::Result<bool> {
    let b_meta = match fs::metadata(b) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if !b_meta.is_file() || fs::metadata(a)?.len() != b_meta.len() {
        return Ok(false);
    }
    Ok(sha256_file(a)? == sha256_file(b)?)
}

fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.partial"))
}

/// Copy `src` to `dest` unless `dest` already holds identical bytes.
///
/// Returns whether bytes were written.
pub fn copy_file_if_changed(src: &Path, dest: &Path) -> Result<bool> {
    if same_contents(src, dest)? {
        return Ok(false);
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = partial_path(dest);
    fs::copy(src, &tmp)?;
    fs::rename(&tmp, dest)?;
    Ok(true)
}

/// Copy `src` into `dest_dir`, keeping its file name.
pub fn copy_into_dir(src: &Path, dest_dir: &Path) -> Result<ArchivedFile> {
    let name = src.file_name().ok_or_else(|| {
        crate::error::RunlogError::invalid_argument(format!(
            "'{}' has no file name",
            src.display()
        ))
    })?;
    let destination = dest_dir.join(name);
    let copied = copy_file_if_changed(src, &destination)?;
    if copied {
        tracing::info!(
            source = %src.display(),
            destination = %destination.display(),
            "archived file"
        );
    } else {
        tracing::debug!(destination = %destination.display(), "archive copy already up to date");
    }
    Ok(ArchivedFile {
        source: src.to_path_buf(),
        destination,
        copied,
    })
}

/// Recursively copy every regular file of `src` into `dest`, preserving
/// relative paths. Temporary `.partial` files are skipped.
pub fn copy_tree_if_changed(src: &Path, dest: &Path) -> Result<Vec<ArchivedFile>> {
    let mut archived = Vec::new();
    for entry in walkdir::WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() || is_partial(entry.path()) {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let destination = dest.join(rel);
        let copied = copy_file_if_changed(entry.path(), &destination)?;
        archived.push(ArchivedFile {
            source: entry.path().to_path_buf(),
            destination,
            copied,
        });
    }
    tracing::info!(
        source = %src.display(),
        destination = %dest.display(),
        files = archived.len(),
        copied = archived.iter().filter(|f| f.copied).count(),
        "archived directory"
    );
    Ok(archived)
}

pub(crate) fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(".partial"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = ArchiveLayout::from_config(
            &ArchiveConfig::default(),
            "tensorboard",
            &SchedulerLogConfig::default(),
        );
        assert_eq!(
            layout.events_dir("4821_bert"),
            PathBuf::from("exp_logs/tensorboard/4821_bert")
        );
        assert_eq!(
            layout.scheduler_dir("bert"),
            PathBuf::from("exp_logs/slurm/bert")
        );
    }

    #[test]
    fn test_copy_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("a.bin");
        fs::write(&src, b"hello").unwrap();
        let dest_dir = tmp.path().join("out").join("nested");

        let first = copy_into_dir(&src, &dest_dir).unwrap();
        assert!(first.copied);
        assert_eq!(fs::read(&first.destination).unwrap(), b"hello");

        let second = copy_into_dir(&src, &dest_dir).unwrap();
        assert!(!second.copied);
        assert!(!partial_path(&first.destination).exists());
    }

    #[test]
    fn test_same_length_different_bytes_is_recopied() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("a.bin");
        let dest = tmp.path().join("b.bin");
        fs::write(&src, b"abcd").unwrap();
        fs::write(&dest, b"abce").unwrap();
        assert!(copy_file_if_changed(&src, &dest).unwrap());
        assert_eq!(fs::read(&dest).unwrap(), b"abcd");
    }

    #[test]
    fn test_copy_tree_preserves_structure() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("run");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("top.txt"), b"1").unwrap();
        fs::write(src.join("sub").join("inner.txt"), b"2").unwrap();
        fs::write(src.join(".inner.txt.partial"), b"x").unwrap();
        let dest = tmp.path().join("archive");

        let first = copy_tree_if_changed(&src, &dest).unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|f| f.copied));
        assert_eq!(fs::read(dest.join("sub").join("inner.txt")).unwrap(), b"2");
        assert!(!dest.join(".inner.txt.partial").exists());

        let second = copy_tree_if_changed(&src, &dest).unwrap();
        assert!(second.iter().all(|f| !f.copied));
    }
}
