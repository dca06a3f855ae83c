//! Logger initialization using tracing.

use anyhow::{anyhow, Result};
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::{LogFormat, LoggingConfig};

/// Holds the file-appender guard so buffered log lines flush on shutdown.
pub struct LoggerGuard {
    _guard: Option<WorkerGuard>,
}

/// Initialize the global tracing subscriber.
///
/// Stdout gets the configured format; when `log_dir` is set a daily-rolling
/// JSON file layer is added alongside.
pub fn init(config: &LoggingConfig) -> Result<LoggerGuard> {
    let default_level = parse_log_level(&config.level)?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let guard = if let Some(log_dir) = &config.log_dir {
        let file_appender = rolling::daily(log_dir, "switchboard.log");
        let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking_file)
            .with_ansi(false)
            .with_target(true);

        match config.format {
            LogFormat::Json => {
                let stdout_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stdout)
                    .with_target(true);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(file_layer)
                    .with(stdout_layer)
                    .init();
            }
            LogFormat::Pretty => {
                let stdout_layer = tracing_subscriber::fmt::layer()
                    .with_writer(io::stdout)
                    .with_target(true);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(file_layer)
                    .with(stdout_layer)
                    .init();
            }
        }
        Some(guard)
    } else {
        match config.format {
            LogFormat::Json => {
                let stdout_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stdout)
                    .with_target(true)
                    .with_filter(env_filter);
                tracing_subscriber::registry().with(stdout_layer).init();
            }
            LogFormat::Pretty => {
                let stdout_layer = tracing_subscriber::fmt::layer()
                    .with_writer(io::stdout)
                    .with_target(true)
                    .with_filter(env_filter);
                tracing_subscriber::registry().with(stdout_layer).init();
            }
        }
        None
    };

    Ok(LoggerGuard { _guard: guard })
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(anyhow!("Invalid log level: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(parse_log_level("verbose").is_err());
    }
}
