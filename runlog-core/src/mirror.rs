//! Remote mirroring of the live log tree.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::archive::{copy_file_if_changed, is_partial};
use crate::config::{MirrorConfig, MirrorTransport};
use crate::error::SyncTransportError;
use crate::identity::MirrorTarget;

/// What one push moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushStats {
    pub files_transferred: u64,
    pub bytes_transferred: u64,
}

/// Transfers a local directory into a remote path.
///
/// `push(dir, target)` places `dir` at `target.path/<dir name>`, recursively and
/// incrementally. Pushing unchanged content again transfers nothing, and a push
/// interrupted halfway leaves the next one able to complete.
pub trait RemoteMirror: Send {
    /// Create the remote directory if absent. Safe to repeat.
    fn ensure_remote_dir(&mut self, target: &MirrorTarget) -> Result<(), SyncTransportError>;

    fn push(
        &mut self,
        local_dir: &Path,
        target: &MirrorTarget,
    ) -> Result<PushStats, SyncTransportError>;
}

/// Build the mirror selected by the configuration.
pub fn mirror_from_config(config: &MirrorConfig) -> Box<dyn RemoteMirror> {
    match config.transport {
        MirrorTransport::Rsync => Box::new(
            RsyncMirror::new(config.rsync_program.clone(), config.ssh_program.clone())
                .with_connect_timeout(config.connect_timeout_secs),
        ),
        MirrorTransport::Local => Box::new(LocalMirror),
    }
}

/// `ssh` + `rsync` transport.
///
/// Both the `mkdir` call and rsync's remote shell use `ssh_program` in batch
/// mode with a connect timeout, so a password prompt or a dead host fails the
/// push instead of blocking the training thread.
#[derive(Debug, Clone)]
pub struct RsyncMirror {
    rsync_program: String,
    ssh_program: String,
    connect_timeout_secs: u64,
}

impl Default for RsyncMirror {
    fn default() -> Self {
        Self::new("rsync", "ssh")
    }
}

impl RsyncMirror {
    pub fn new(rsync_program: impl Into<String>, ssh_program: impl Into<String>) -> Self {
        Self {
            rsync_program: rsync_program.into(),
            ssh_program: ssh_program.into(),
            connect_timeout_secs: 10,
        }
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    fn ssh_options(&self) -> Vec<String> {
        let mut options = vec!["-o".to_string(), "BatchMode=yes".to_string()];
        if self.connect_timeout_secs > 0 {
            options.push("-o".to_string());
            options.push(format!("ConnectTimeout={}", self.connect_timeout_secs));
        }
        options
    }

    fn mkdir_args(&self, target: &MirrorTarget) -> Vec<String> {
        let mut args = self.ssh_options();
        args.push(target.host.clone());
        args.push(format!(
            "mkdir -p {}",
            shell_quote(&target.path.to_string_lossy())
        ));
        args
    }

    /// Remote shell command handed to `rsync -e`.
    fn remote_shell(&self) -> String {
        std::iter::once(shell_quote(&self.ssh_program))
            .chain(self.ssh_options())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn rsync_args(&self, local_dir: &Path, target: &MirrorTarget) -> Vec<String> {
        // No trailing slash on the source: rsync recreates the directory itself
        // under the destination.
        let source = local_dir
            .to_string_lossy()
            .trim_end_matches('/')
            .to_string();
        vec![
            "-rtz".to_string(),
            "--partial".to_string(),
            "--stats".to_string(),
            "-e".to_string(),
            self.remote_shell(),
            source,
            format!("{}/", target.rsync_destination().trim_end_matches('/')),
        ]
    }

    fn run(program: &str, args: &[String]) -> Result<Output, SyncTransportError> {
        tracing::debug!(program, ?args, "running mirror command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| SyncTransportError::Spawn {
                program: program.to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(SyncTransportError::CommandFailed {
                program: program.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl RemoteMirror for RsyncMirror {
    fn ensure_remote_dir(&mut self, target: &MirrorTarget) -> Result<(), SyncTransportError> {
        Self::run(&self.ssh_program, &self.mkdir_args(target))?;
        tracing::info!(host = %target.host, path = %target.path.display(), "remote directory ready");
        Ok(())
    }

    fn push(
        &mut self,
        local_dir: &Path,
        target: &MirrorTarget,
    ) -> Result<PushStats, SyncTransportError> {
        let output = Self::run(&self.rsync_program, &self.rsync_args(local_dir, target))?;
        Ok(parse_rsync_stats(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Read the file and byte counts from `rsync --stats` output.
pub fn parse_rsync_stats(stdout: &str) -> PushStats {
    let mut stats = PushStats::default();
    for line in stdout.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let number = || -> u64 {
            value
                .split_whitespace()
                .next()
                .map(|n| n.replace(',', ""))
                .and_then(|n| n.parse().ok())
                .unwrap_or(0)
        };
        match key.trim() {
            "Number of regular files transferred" | "Number of files transferred" => {
                stats.files_transferred = number()
            }
            "Total transferred file size" => stats.bytes_transferred = number(),
            _ => {}
        }
    }
    stats
}

/// Quote `s` for a POSIX shell when it contains anything but safe characters.
fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

/// Mirror into a locally mounted path; `target.host` is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalMirror;

impl LocalMirror {
    fn destination_root(local_dir: &Path, target: &MirrorTarget) -> PathBuf {
        match local_dir.file_name() {
            Some(name) => target.path.join(name),
            None => target.path.clone(),
        }
    }
}

impl RemoteMirror for LocalMirror {
    fn ensure_remote_dir(&mut self, target: &MirrorTarget) -> Result<(), SyncTransportError> {
        std::fs::create_dir_all(&target.path)?;
        Ok(())
    }

    fn push(
        &mut self,
        local_dir: &Path,
        target: &MirrorTarget,
    ) -> Result<PushStats, SyncTransportError> {
        let dest_root = Self::destination_root(local_dir, target);
        let mut stats = PushStats::default();
        for entry in walkdir::WalkDir::new(local_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| SyncTransportError::Walk {
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() || is_partial(entry.path()) {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(local_dir) else {
                continue;
            };
            let copied = copy_file_if_changed(entry.path(), &dest_root.join(rel))
                .map_err(|e| match e {
                    crate::error::RunlogError::Io(io) => SyncTransportError::Io(io),
                    other => SyncTransportError::Walk {
                        message: other.to_string(),
                    },
                })?;
            if copied {
                stats.files_transferred += 1;
                stats.bytes_transferred += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        Ok(stats)
    }
}
