//! Structured logging setup.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! the embedding application's choice. [`init_logging`] installs a
//! `tracing-subscriber` fmt subscriber on stderr in text or JSON form.
//!
//! `RUST_LOG` overrides the configured level, e.g.
//! `RUST_LOG=ragversion=debug,sqlx=warn`.
//!
//! Field names used across the crate: `path`, `document_id`, `version`,
//! `change`, `listener`, `chunker`.

use std::sync::OnceLock;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use ragversion_core::{Error, Result};

use crate::config::{LogFormat, LoggingConfig};

static LOGGING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install the global subscriber. A second call returns a configuration error.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(Error::Configuration("logging already initialized".into()));
    }

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::Configuration(format!("invalid log level '{}': {}", config.level, e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .try_init(),
    };
    installed.map_err(|e| Error::Configuration(format!("failed to set global subscriber: {}", e)))?;

    let _ = LOGGING_INITIALIZED.set(());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig::default();
        let first = init_logging(&config);
        // Another test binary thread may have installed a subscriber first.
        if first.is_ok() {
            assert!(init_logging(&config).is_err());
        }
    }
}
