//! CLI subcommand handlers.

use anyhow::{Context, bail};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use runlog_core::config::{
    ArchiveMode, RunlogConfig, config_exists, load_config, workspace_config_path,
};
use runlog_core::manifest::{RunManifest, load_json};
use runlog_core::reconcile::locate_run_dir;
use runlog_core::writer::proto::{self, event, summary_value};
use runlog_core::writer::read_events;
use runlog_core::{EventLogStore, LogReconciler, RunIdentity, mirror_from_config};

use crate::Commands;
use crate::ConfigAction;

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace),
        Commands::Logdir => handle_logdir(workspace),
        Commands::List { dir, host } => handle_list(workspace, dir, host.as_deref()),
        Commands::Inspect { file } => handle_inspect(&file),
        Commands::Sync { run_dir } => handle_sync(workspace, run_dir),
        Commands::Finalize {
            run_dir,
            start_timestamp,
            whole_dir,
            archive_root,
        } => handle_finalize(workspace, run_dir, start_timestamp, whole_dir, archive_root),
    }
}

fn config(workspace: &Path) -> anyhow::Result<RunlogConfig> {
    load_config(Some(workspace), None).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

fn identity() -> anyhow::Result<RunIdentity> {
    RunIdentity::from_env().context("Failed to resolve run identity from the environment")
}

/// `dir` if given, else the latest run directory of the experiment.
fn run_dir_or_latest(
    dir: Option<PathBuf>,
    identity: &RunIdentity,
    config: &RunlogConfig,
) -> anyhow::Result<PathBuf> {
    if let Some(dir) = dir {
        return Ok(dir);
    }
    let root = identity.events_root(&config.live);
    let experiment = identity.experiment_name();
    locate_run_dir(&root, experiment, &config.live.timestamp_format)?.with_context(|| {
        format!(
            "No run directory '<{}>_{experiment}' under {}",
            config.live.timestamp_format,
            root.display()
        )
    })
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let toml_str = toml::to_string_pretty(&RunlogConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&config(workspace)?)?;
            if !config_exists(Some(workspace)) {
                println!("# No configuration file found; showing defaults.");
            }
            println!("{}", toml_str);
            Ok(())
        }
    }
}

fn handle_logdir(workspace: &Path) -> anyhow::Result<()> {
    let config = config(workspace)?;
    let identity = identity()?;
    let store = EventLogStore::open(identity.live_log_dir(&config.live), config.layout)?;
    println!("{}", store.dir().display());
    Ok(())
}

fn handle_list(workspace: &Path, dir: Option<PathBuf>, host: Option<&str>) -> anyhow::Result<()> {
    let config = config(workspace)?;
    let dir = match dir {
        Some(dir) => dir,
        None => run_dir_or_latest(None, &identity()?, &config)?,
    };
    let store = EventLogStore::at(&dir, config.layout);
    let files = match host {
        Some(host) => store.list_for_host(host)?,
        None => store.list()?,
    };
    if files.is_empty() {
        println!("No event files in {}", dir.display());
        return Ok(());
    }
    for file in files {
        println!(
            "{:<24} {:>12} {:>10}  {}",
            file.created_host,
            file.created_timestamp,
            file.size_bytes,
            file.file_name()
        );
    }
    Ok(())
}

/// Per-tag record counts and step range of an event file.
#[derive(Debug, Default, PartialEq)]
struct EventSummary {
    file_version: Option<String>,
    events: usize,
    /// tag -> (kind, count, first step, last step)
    tags: BTreeMap<String, (&'static str, usize, i64, i64)>,
}

fn summarize(events: &[proto::Event]) -> EventSummary {
    let mut summary = EventSummary {
        events: events.len(),
        ..Default::default()
    };
    for ev in events {
        match &ev.what {
            Some(event::What::FileVersion(version)) => {
                summary.file_version = Some(version.clone())
            }
            Some(event::What::Summary(s)) => {
                for value in &s.value {
                    let kind = match &value.value {
                        Some(summary_value::Value::SimpleValue(_)) => "scalar",
                        Some(summary_value::Value::Image(_)) => "image",
                        Some(summary_value::Value::Audio(_)) => "audio",
                        None if value.metadata.is_some() => "plugin",
                        None => "empty",
                    };
                    summary
                        .tags
                        .entry(value.tag.clone())
                        .and_modify(|(_, count, _, last)| {
                            *count += 1;
                            *last = ev.step;
                        })
                        .or_insert((kind, 1, ev.step, ev.step));
                }
            }
            None => {}
        }
    }
    summary
}

fn handle_inspect(file: &Path) -> anyhow::Result<()> {
    let events =
        read_events(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let summary = summarize(&events);
    println!("File:    {}", file.display());
    println!(
        "Version: {}",
        summary.file_version.as_deref().unwrap_or("(missing)")
    );
    println!("Events:  {}", summary.events);
    for (tag, (kind, count, first, last)) in &summary.tags {
        println!("  {tag:<40} {kind:<7} {count:>6}  steps {first}..={last}");
    }
    Ok(())
}

fn handle_sync(workspace: &Path, run_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let config = config(workspace)?;
    let identity = identity()?;
    let Some(target) = identity.mirror() else {
        bail!("REMOTE_SYNC_HOST and REMOTE_LOGS_ROOT_DIR must be set to sync");
    };
    let run_dir = run_dir_or_latest(run_dir, &identity, &config)?;
    let mut mirror = mirror_from_config(&config.mirror);
    mirror.ensure_remote_dir(target)?;
    let stats = mirror.push(&run_dir, target)?;
    println!(
        "Pushed {} to {}: {} files, {} bytes",
        run_dir.display(),
        target.rsync_destination(),
        stats.files_transferred,
        stats.bytes_transferred
    );
    Ok(())
}

/// Explicit flag, else the run manifest, else the identity's own (current) time.
fn resolve_start_timestamp(
    flag: Option<i64>,
    manifest: Option<&RunManifest>,
    identity: &RunIdentity,
) -> i64 {
    flag.or_else(|| manifest.map(|m| m.start_timestamp))
        .unwrap_or_else(|| identity.start_timestamp())
}

fn handle_finalize(
    workspace: &Path,
    run_dir: Option<PathBuf>,
    start_timestamp: Option<i64>,
    whole_dir: bool,
    archive_root: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = config(workspace)?;
    let identity = identity()?;

    let run_dir = match run_dir {
        Some(dir) => Some(dir),
        None => locate_run_dir(
            &identity.events_root(&config.live),
            identity.experiment_name(),
            &config.live.timestamp_format,
        )?,
    };
    let manifest: Option<RunManifest> = match &run_dir {
        Some(dir) => load_json(&dir.join(&config.live.manifest_name))?,
        None => None,
    };
    let start = resolve_start_timestamp(start_timestamp, manifest.as_ref(), &identity);
    let identity = identity.with_start_timestamp(start);
    tracing::debug!(start, run_dir = ?run_dir, from_manifest = manifest.is_some(), "finalizing");

    let mut reconciler = LogReconciler::from_config(&config);
    if let Some(root) = archive_root {
        reconciler = reconciler.with_archive_root(root);
    }
    if whole_dir {
        reconciler = reconciler.with_mode(ArchiveMode::WholeRunDir);
    }

    let report = reconciler.finalize(&identity, run_dir.as_deref())?;
    for file in report.event_logs.iter().chain(report.scheduler_log.iter()) {
        let status = if file.copied { "copied" } else { "unchanged" };
        println!("{status:<9} {}", file.destination.display());
    }
    for notice in &report.notices {
        println!("notice    {notice}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scalar(tag: &str, step: i64) -> proto::Event {
        proto::Event {
            wall_time: 0.0,
            step,
            what: Some(event::What::Summary(proto::Summary {
                value: vec![proto::SummaryValue {
                    tag: tag.to_string(),
                    metadata: None,
                    value: Some(summary_value::Value::SimpleValue(1.0)),
                }],
            })),
        }
    }

    #[test]
    fn test_summarize_counts_tags_and_steps() {
        let events = vec![
            proto::Event {
                wall_time: 0.0,
                step: 0,
                what: Some(event::What::FileVersion("brain.Event:2".into())),
            },
            scalar("loss", 1),
            scalar("loss", 2),
            scalar("acc", 2),
            scalar("loss", 7),
        ];
        let summary = summarize(&events);
        assert_eq!(summary.file_version.as_deref(), Some("brain.Event:2"));
        assert_eq!(summary.events, 5);
        assert_eq!(summary.tags["loss"], ("scalar", 3, 1, 7));
        assert_eq!(summary.tags["acc"], ("scalar", 1, 2, 2));
    }

    #[test]
    fn test_start_timestamp_precedence() {
        let identity =
            RunIdentity::new("bert", "nlp", "node07", "/logs").with_start_timestamp(300);
        let manifest = RunManifest::from_identity(&identity.clone().with_start_timestamp(200));
        assert_eq!(resolve_start_timestamp(Some(100), Some(&manifest), &identity), 100);
        assert_eq!(resolve_start_timestamp(None, Some(&manifest), &identity), 200);
        assert_eq!(resolve_start_timestamp(None, None, &identity), 300);
    }

    #[test]
    fn test_run_dir_or_latest_prefers_explicit() {
        let identity = RunIdentity::new("bert", "nlp", "node07", "/nonexistent");
        let config = RunlogConfig::default();
        let dir = run_dir_or_latest(Some(PathBuf::from("/x")), &identity, &config).unwrap();
        assert_eq!(dir, PathBuf::from("/x"));
        assert!(run_dir_or_latest(None, &identity, &config).is_err());
    }
}
