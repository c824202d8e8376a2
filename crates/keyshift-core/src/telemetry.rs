//! Logging setup
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] and a
//! `fmt` layer. `RUST_LOG` takes precedence over the configured level.
//! Output goes to stderr so stdout stays free for the final report.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{KeyshiftError, Result};

/// Build the filter for the given level, letting `RUST_LOG` override it.
pub fn env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| KeyshiftError::Telemetry(format!("invalid log level '{}': {}", level, e))),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(&config.level)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
    };

    installed.map_err(|e| {
        KeyshiftError::Telemetry(format!("Failed to initialize tracing subscriber: {e}"))
    })
}
