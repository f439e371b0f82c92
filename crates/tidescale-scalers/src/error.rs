//! Scaler error types.

use std::time::Duration;

use thiserror::Error;

use tidescale_core::ResolveError;
use tidescale_credentials::CredentialError;

/// Errors from constructing or evaluating a scaler.
#[derive(Debug, Clone, Error)]
pub enum ScalerError {
    #[error("unknown trigger type: {0}")]
    UnknownType(String),

    #[error("missing required metadata: {0}")]
    MissingMetadata(String),

    #[error("invalid metadata {key}: {reason}")]
    InvalidMetadata { key: String, reason: String },

    #[error("trigger authentication: {0}")]
    Resolve(#[from] ResolveError),

    #[error("credentials: {0}")]
    Credential(#[from] CredentialError),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unexpected response: {0}")]
    Response(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("scaler task failed: {0}")]
    Task(String),
}

impl ScalerError {
    pub fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
