//! Error types for cloud provisioning.

use dbb_config::ConfigError;
use thiserror::Error;

pub type CloudResult<T> = Result<T, CloudError>;

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("droplet '{0}' already active")]
    AlreadyActive(String),

    #[error("worker '{name}' failed to substantiate: {reason}")]
    SubstantiationFailed { name: String, reason: String },

    #[error("no image named '{0}' in the account")]
    ImageNotFound(String),

    #[error("cloud API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("background task failed: {0}")]
    Task(String),
}

impl CloudError {
    /// Whether this is a precondition failure detected before any mutating call.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(self, Self::AlreadyActive(_))
    }
}
