// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `framedag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "framedag",
    version,
    about = "Compile a stage graph and run it tick by tick.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Framedag.toml")]
    pub config: String,

    /// Stop after this many ticks. Runs until Ctrl-C when omitted.
    #[arg(long, value_name = "N")]
    pub ticks: Option<u64>,

    /// Delay between ticks, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 16)]
    pub interval_ms: u64,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FRAMEDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Compile and print order, levels and slots without running ticks.
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
