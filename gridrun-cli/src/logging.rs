//! Logging setup for `gridrun` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `GRIDRUN_LOG` environment variable (a level or filter directives)
//! 3. default to `warn`
//!
//! Logs go to STDERR; step output and reports use STDOUT.

use color_eyre::eyre::eyre;
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

use crate::LogLevel;

/// Initialise the global logging subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(level_directive(level)),
        None => match std::env::var("GRIDRUN_LOG") {
            Ok(value) if !value.trim().is_empty() => EnvFilter::try_new(value.trim())
                .map_err(|e| eyre!("invalid GRIDRUN_LOG '{}': {}", value, e))?,
            _ => EnvFilter::new("warn"),
        },
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| eyre!("failed to initialise logging: {}", e))
}

fn level_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
