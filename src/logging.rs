// src/logging.rs

//! Logging setup for `batchdag` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `BATCHDAG_LOG` environment variable: a plain level ("info", "debug")
//!    or a full filter directive ("batchdag::engine=debug,info")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that stdout carries only the run report.

use anyhow::{Context, Result, anyhow};
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "BATCHDAG_LOG";

/// Initialise global logging subscriber.
///
/// Fails if called twice.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env_value = std::env::var(LOG_ENV_VAR).ok();
    let filter = build_filter(cli_level, env_value.as_deref())?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(())
}

fn build_filter(cli_level: Option<LogLevel>, env_value: Option<&str>) -> Result<EnvFilter> {
    if let Some(lvl) = cli_level {
        return Ok(EnvFilter::new(level_from_log_level(lvl).as_str()));
    }

    match env_value.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(EnvFilter::new(Level::INFO.as_str())),
        Some(directive) => match parse_level_str(directive) {
            Some(level) => Ok(EnvFilter::new(level.as_str())),
            None => EnvFilter::try_new(directive)
                .with_context(|| format!("invalid {LOG_ENV_VAR} value '{directive}'")),
        },
    }
}

fn level_from_log_level(lvl: LogLevel) -> Level {
    match lvl {
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    }
}

fn parse_level_str(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::filter::LevelFilter;

    use super::*;

    fn max_level(filter: EnvFilter) -> Option<LevelFilter> {
        filter.max_level_hint()
    }

    #[test]
    fn cli_level_wins_over_env() {
        let filter = build_filter(Some(LogLevel::Debug), Some("error")).unwrap();
        assert_eq!(max_level(filter), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn env_accepts_levels_and_directives() {
        let warn = build_filter(None, Some("Warning")).unwrap();
        assert_eq!(max_level(warn), Some(LevelFilter::WARN));

        let unset = build_filter(None, None).unwrap();
        assert_eq!(max_level(unset), Some(LevelFilter::INFO));

        let blank = build_filter(None, Some("  ")).unwrap();
        assert_eq!(max_level(blank), Some(LevelFilter::INFO));

        let directive = build_filter(None, Some("batchdag::engine=trace")).unwrap();
        assert_eq!(max_level(directive), Some(LevelFilter::TRACE));
    }

    #[test]
    fn env_rejects_garbage() {
        assert!(build_filter(None, Some("batchdag=loud")).is_err());
    }
}
