//! Tracing setup. A thread-local subscriber covers configuration loading,
//! then `[logging]` decides the global one.

use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LogFormat, LogOutput, LoggingConfig};

const BOOTSTRAP_FILTER: &str = "info,host=debug";

/// `RUST_LOG` always wins over the configured directives
fn filter_or(directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives))
}

/// Subscriber for the current thread until [`install`] runs. Dropping the
/// guard removes it.
pub fn bootstrap() -> DefaultGuard {
    let subscriber = fmt()
        .compact()
        .with_env_filter(filter_or(BOOTSTRAP_FILTER))
        .with_target(true)
        .finish();

    tracing::subscriber::set_default(subscriber)
}

/// Install the process-wide subscriber described by `logging`.
pub fn install(logging: &LoggingConfig) -> Result<()> {
    let filter = filter_or(&logging.level);

    let (writer, ansi) = match &logging.output {
        LogOutput::Stdout => (BoxMakeWriter::new(std::io::stdout), true),
        LogOutput::File { path } => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file '{}'", path))?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
    };

    let installed = match logging.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_writer(writer);
            tracing_subscriber::registry().with(filter).with(layer).try_init()
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .with_target(true)
                .with_ansi(ansi)
                .with_writer(writer);
            tracing_subscriber::registry().with(filter).with(layer).try_init()
        }
    };

    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}
