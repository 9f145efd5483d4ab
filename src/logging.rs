//! Logging setup for the command line tool.
//!
//! Installs a global tracing subscriber writing to stderr. The filter comes
//! from the explicit level if one is given, `RUST_LOG` otherwise.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

const DEFAULT_FILTER: &str = "info";

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Errors that may occur while initializing logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// The requested filter directive could not be parsed.
    #[error("Invalid log filter {filter:?}: {source}")]
    Filter {
        filter: String,
        source: tracing_subscriber::filter::ParseError,
    },
    /// Failed to set the global tracing subscriber.
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(tracing::subscriber::SetGlobalDefaultError),
}

/// Initialize tracing. Subsequent calls are no-ops.
pub fn init(level: Option<&str>) -> Result<(), LoggingError> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }
    let env_filter = build_env_filter(level)?;
    let subscriber = Registry::default()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr));
    tracing::subscriber::set_global_default(subscriber).map_err(LoggingError::SetGlobal)?;
    let _ = INITIALIZED.set(());
    Ok(())
}

fn build_env_filter(level: Option<&str>) -> Result<EnvFilter, LoggingError> {
    match level {
        Some(filter) => EnvFilter::try_new(filter).map_err(|source| LoggingError::Filter {
            filter: filter.to_string(),
            source,
        }),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_level_names() {
        assert!(build_env_filter(Some("debug")).is_ok());
        assert!(build_env_filter(Some("songmatch=trace,warn")).is_ok());
    }
}
