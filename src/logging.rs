//! Tracing subscriber setup.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

use crate::board_config::{LogFormat, LoggingSection};

const LOG_FILE_PREFIX: &str = "sprintboard.log";

/// Build the event filter. `RUST_LOG` wins over the configured level, and an
/// unparseable level falls back to `info`.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Console output is pretty or JSON per `config.format`. When `config.dir`
/// is set, JSON lines are also written to a daily rolling file there; the
/// returned guard must be held until exit so buffered lines are flushed.
pub fn init_tracing(config: &LoggingSection) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    layers.push(match config.format {
        LogFormat::Pretty => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    });

    let mut guard = None;
    if let Some(dir) = &config.dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
        guard = Some(file_guard);
    }

    layers.push(build_filter(&config.level).boxed());

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
