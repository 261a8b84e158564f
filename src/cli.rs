// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::default_config_path;

/// Command-line arguments for `jobfleet`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "jobfleet",
    version,
    about = "Run batches of jobs across a pool of worker processes.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `JOBFLEET_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run every job from the configured providers.
    Run(RunArgs),

    /// Worker entry point, started by the coordinator.
    #[command(hide = true)]
    Worker {
        /// Inbound channel: `-` for stdin, or a path.
        inbound: String,
        /// Outbound channel: `-` for stdout, or a path.
        outbound: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Number of worker processes. Overrides `[pool].workers`.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Append result tables as JSON lines to this file.
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Per-job timeout (e.g. `30s`, `10m`). Overrides `[pool].job_timeout`.
    #[arg(long, value_name = "DURATION")]
    pub timeout: Option<String>,

    /// Log running jobs and their progress at this interval (e.g. `5s`).
    #[arg(long, value_name = "DURATION")]
    pub progress_every: Option<String>,

    /// Parse + validate, print the jobs, but don't start any workers.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
