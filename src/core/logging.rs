//! Tracing setup for `addonctl`
//!
//! Events go to stdout, stderr or a log file rolled by `tracing-appender`.
//! `RUST_LOG` takes precedence over the configured level.

use crate::core::config::LoggingConfig;
use anyhow::{bail, Context, Result};
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Keeps the non-blocking writer flushing until dropped
pub struct Logger {
    _guard: WorkerGuard,
}

impl Logger {
    /// Install the global subscriber described by `config`
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&config.level)
                .with_context(|| format!("Invalid log level: {}", config.level))?,
        };

        let (writer, guard) = match config.output.as_str() {
            "stdout" => tracing_appender::non_blocking(io::stdout()),
            "stderr" => tracing_appender::non_blocking(io::stderr()),
            "file" => tracing_appender::non_blocking(file_appender(config)?),
            other => bail!("Invalid log output: {}", other),
        };

        let layer = match config.format.as_str() {
            "json" => fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(writer)
                .boxed(),
            "text" => fmt::layer()
                .with_ansi(config.output != "file")
                .with_target(true)
                .with_writer(writer)
                .boxed(),
            other => bail!("Invalid log format: {}", other),
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
            .context("Failed to initialize tracing subscriber")?;

        tracing::debug!(
            level = %config.level,
            format = %config.format,
            output = %config.output,
            "Logging initialized"
        );
        Ok(Logger { _guard: guard })
    }
}

fn rotation(name: &str) -> Result<Rotation> {
    Ok(match name {
        "minutely" => Rotation::MINUTELY,
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        "never" => Rotation::NEVER,
        other => bail!("Invalid log rotation: {}", other),
    })
}

/// Appender writing to `log_file`, rolled files share its name as prefix
fn file_appender(config: &LoggingConfig) -> Result<RollingFileAppender> {
    let log_file = config
        .log_file
        .as_deref()
        .context("log_file must be specified when output is 'file'")?;
    let directory = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let prefix = log_file
        .file_name()
        .and_then(|name| name.to_str())
        .context("log_file must end in a UTF-8 file name")?;

    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory {}", directory.display()))?;

    RollingFileAppender::builder()
        .rotation(rotation(&config.rotation)?)
        .filename_prefix(prefix)
        .max_log_files(config.max_log_files)
        .build(directory)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))
}
