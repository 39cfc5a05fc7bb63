//! Error types for Docker operations.

use dbb_config::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DockerError {
    #[error("container '{0}' already running")]
    AlreadyRunning(String),

    #[error("container '{0}' exists; please remove before init")]
    AlreadyExists(String),

    #[error("container '{0}' does not exist")]
    NotFound(String),

    #[error("container '{0}' is not running")]
    NotRunning(String),

    #[error("container '{0}' is running; stop it before removing")]
    StillRunning(String),

    #[error("Docker API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Docker transport error: {0}")]
    Transport(String),

    #[error("image build failed: {0}")]
    BuildFailed(String),

    #[error("initialization failed: {0}")]
    InitFailed(String),

    #[error("command `{command}` failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DockerError {
    /// Whether this is a lifecycle precondition failure, detected before any
    /// mutating call was issued.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::AlreadyRunning(_)
                | Self::AlreadyExists(_)
                | Self::NotFound(_)
                | Self::NotRunning(_)
                | Self::StillRunning(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DockerError>;
