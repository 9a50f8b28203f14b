// src/logging.rs

//! Diagnostics for a `nodeflow` run.
//!
//! Stdout belongs to the run's result: the per-node summary table followed by
//! the final plan status on its own line, so `nodeflow --plan x.toml | tail -1`
//! yields just the status. Everything emitted through `tracing` (node status
//! changes, wait/notify deliveries, interrupt handling, shell task stderr)
//! goes to stderr.
//!
//! `NODEFLOW_LOG` takes `EnvFilter` directives, e.g.
//! `info,nodeflow::waiter=debug`. `--log-level` replaces the global default
//! level but per-module directives from `NODEFLOW_LOG` still apply.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "NODEFLOW_LOG";

const DEFAULT_LEVEL: &str = "info";

/// Install the global stderr subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV).ok();
    let filter = EnvFilter::try_new(filter_directives(cli_level, env.as_deref()))
        .map_err(|e| anyhow!("invalid {LOG_ENV}: {e}"))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("logging already initialised: {e}"))
}

/// Combine the CLI level with `NODEFLOW_LOG` into one directive string.
///
/// A bare level in the environment (`debug`) is the global default unless the
/// CLI names one; `target=level` directives are always kept.
pub fn filter_directives(cli_level: Option<LogLevel>, env: Option<&str>) -> String {
    let mut global = cli_level.map(level_directive);
    let mut targeted = Vec::new();

    for directive in env
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
    {
        if directive.contains('=') {
            targeted.push(directive.to_string());
        } else if global.is_none() {
            global = Some(directive.to_lowercase());
        }
    }

    let mut directives = vec![global.unwrap_or_else(|| DEFAULT_LEVEL.to_string())];
    directives.extend(targeted);
    directives.join(",")
}

fn level_directive(level: LogLevel) -> String {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
    .to_string()
}
