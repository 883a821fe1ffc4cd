// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for the `clusterq` scheduler daemon.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "clusterq",
    version,
    about = "Distribute queued job sequences across a pool of worker hosts.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `clusterq.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "clusterq.toml")]
    pub config: String,

    /// Override `scheduler.queue_dir` from the config file.
    #[arg(long, value_name = "DIR")]
    pub queue_dir: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CLUSTERQ_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Append logs to this file instead of writing them to stderr.
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Validate config, print hosts, job types and queued sequences, then exit.
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
