//! Credential cache error types.

use thiserror::Error;

pub type CredentialResult<T> = Result<T, CredentialError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential source unavailable: {0}")]
    Unavailable(String),

    #[error("credential resolution failed for region {region}: {reason}")]
    Resolution { region: String, reason: String },

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
}
