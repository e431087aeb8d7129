//! Runlog CLI: inspect, mirror and archive the event logs of training runs.
//!
//! Run identity comes from the environment (`LOGS_ROOT_DIR`, `PROJECT_NAME`,
//! `EXPERIMENT_NAME`, ...); tunables come from `.runlog/config.toml`.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Runlog: experiment log reconciliation and sync
#[derive(Parser, Debug)]
#[command(name = "runlog", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (holds `.runlog/config.toml`)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Create this run's live log directory and print its path
    Logdir,
    /// List parsed event files of a run directory
    List {
        /// Run directory (defaults to the latest run of EXPERIMENT_NAME)
        dir: Option<PathBuf>,
        /// Only files whose host contains this text
        #[arg(long)]
        host: Option<String>,
    },
    /// Summarize the records of an event file
    Inspect {
        file: PathBuf,
    },
    /// Push a run directory to the remote mirror once
    Sync {
        /// Run directory (defaults to the latest run of EXPERIMENT_NAME)
        #[arg(long)]
        run_dir: Option<PathBuf>,
    },
    /// Archive this run's event log and scheduler output
    Finalize {
        /// Run directory (defaults to the latest run of EXPERIMENT_NAME)
        #[arg(long)]
        run_dir: Option<PathBuf>,
        /// Start time to reconcile against (seconds since epoch)
        #[arg(long)]
        start_timestamp: Option<i64>,
        /// Archive every file of the run directory
        #[arg(long)]
        whole_dir: bool,
        /// Archive root (overrides the configured one)
        #[arg(long)]
        archive_root: Option<PathBuf>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "runlog", "runlog")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "runlog.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_finalize_flags() {
        let cli = Cli::parse_from([
            "runlog",
            "-vv",
            "finalize",
            "--start-timestamp",
            "1700000000",
            "--whole-dir",
            "--archive-root",
            "/tmp/archive",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Finalize {
                run_dir,
                start_timestamp,
                whole_dir,
                archive_root,
            } => {
                assert!(run_dir.is_none());
                assert_eq!(start_timestamp, Some(1_700_000_000));
                assert!(whole_dir);
                assert_eq!(archive_root, Some(PathBuf::from("/tmp/archive")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_list_with_host() {
        let cli = Cli::parse_from(["runlog", "list", "/logs/run", "--host", "node07"]);
        match cli.command {
            Commands::List { dir, host } => {
                assert_eq!(dir, Some(PathBuf::from("/logs/run")));
                assert_eq!(host.as_deref(), Some("node07"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
