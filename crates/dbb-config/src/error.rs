//! Error types for dbb-config.

use std::path::PathBuf;

/// Result type alias using [`ConfigError`].
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading configuration or rendering the build context.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be located.
    #[error("unable to locate config '{0}'")]
    NotFound(PathBuf),

    /// Failed to parse configuration.
    #[error("configuration error: {0}")]
    Parse(String),

    /// A required setting is absent.
    #[error("missing required setting: {0}")]
    Missing(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// No worker with this name is configured.
    #[error("no worker named '{0}' in configuration")]
    UnknownWorker(String),

    /// No worker could be matched to this machine's hostname.
    #[error("unable to find worker from hostname '{0}'")]
    NoWorkerForHost(String),

    /// Template rendering failed.
    #[error("template error in {template}: {reason}")]
    Template {
        /// Template name.
        template: String,
        /// What went wrong.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Create a missing-setting error.
    #[must_use]
    pub fn missing(setting: impl Into<String>) -> Self {
        Self::Missing(setting.into())
    }

    /// Create an invalid-configuration error.
    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
