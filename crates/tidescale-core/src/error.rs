//! Error types for configuration and credential resolution.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating scaling targets.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("invalid target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },
}

/// Errors raised while resolving a trigger's authentication parameters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("environment variable not set: {0}")]
    MissingEnv(String),

    #[error("secret not found: {0}")]
    MissingSecret(String),

    #[error("key {key} not found in secret {secret}")]
    MissingSecretKey { secret: String, key: String },

    #[error("malformed secret reference `{0}` (expected `secret/key`)")]
    MalformedReference(String),
}
