//! Error types for the Shardlimit service.

use thiserror::Error;

/// Main error type for Shardlimit operations.
#[derive(Error, Debug)]
pub enum ShardlimitError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The reconfiguration task is no longer running
    #[error("Coordinator stopped")]
    CoordinatorStopped,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for ShardlimitError {
    fn from(err: config::ConfigError) -> Self {
        ShardlimitError::Config(err.to_string())
    }
}

/// Errors returned synchronously to the caller of a rate limit evaluation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluateError {
    #[error("rate limit domain must not be empty")]
    EmptyDomain,

    #[error("rate limit descriptor list must not be empty")]
    EmptyDescriptors,

    #[error("no rate limit configuration loaded")]
    NoConfiguration,

    #[error("unsupported ratelimit override")]
    UnsupportedRateLimitOverride,
}

impl EvaluateError {
    /// Whether the caller sent a malformed request, as opposed to the
    /// service being unable to answer.
    pub fn is_invalid_argument(&self) -> bool {
        !matches!(self, EvaluateError::NoConfiguration)
    }
}

/// Result type alias for Shardlimit operations.
pub type Result<T> = std::result::Result<T, ShardlimitError>;
