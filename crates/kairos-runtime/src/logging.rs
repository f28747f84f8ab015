//! Tracing subscriber bootstrap

use crate::config::{LogFormat, LoggingConfig};
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{0}': {1}")]
    InvalidFilter(String, String),

    #[error("failed to install subscriber: {0}")]
    Install(String),
}

/// Installs the global subscriber described by `config`, writing to stderr.
///
/// `RUST_LOG` takes precedence over the configured level when set. Fails if
/// a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => filter_for(&config.level)?,
    };
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match (config.format, config.timestamps) {
        (LogFormat::Text, true) => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        (LogFormat::Text, false) => registry
            .with(fmt::layer().with_writer(std::io::stderr).without_time())
            .try_init(),
        (LogFormat::Json, true) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        (LogFormat::Json, false) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr).without_time())
            .try_init(),
    };
    installed.map_err(|e| LoggingError::Install(e.to_string()))
}

fn filter_for(level: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(level).map_err(|e| LoggingError::InvalidFilter(level.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_levels_and_directives() {
        assert!(filter_for("info").is_ok());
        assert!(filter_for("kairos_runtime=debug,warn").is_ok());
    }

    #[test]
    fn test_filter_rejects_garbage() {
        let err = filter_for("kairos_runtime=loud").unwrap_err();
        assert!(matches!(err, LoggingError::InvalidFilter(ref level, _) if level == "kairos_runtime=loud"));
    }
}
