// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `nodeflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "nodeflow",
    version,
    about = "Execute a pipeline plan of sync, async, task and parent nodes.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the plan file (TOML).
    ///
    /// Default: `Nodeflow.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Nodeflow.toml")]
    pub plan: String,

    /// Extra setup abstraction, e.g. `--setup accountId=acc-1`. Overrides
    /// the plan file's `[setup]` table. May be repeated.
    #[arg(long = "setup", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub setup: Vec<(String, String)>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `NODEFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the plan, but don't execute anything.
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

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
