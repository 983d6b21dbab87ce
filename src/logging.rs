//! Tracing subscriber setup.

use crate::error::{NetworkError, Result};
use prolink_core::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Installs a global fmt subscriber for `config`.
///
/// `RUST_LOG` takes precedence over the configured levels when set. Fails if
/// a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    config.validate()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directive()))
        .map_err(|e| NetworkError::Logging(e.to_string()))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|e| NetworkError::Logging(e.to_string()))
}
