//! Scale handler errors.

use thiserror::Error;

use tidescale_core::ConfigError;

pub type HandlerResult<T> = Result<T, HandlerError>;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    InvalidTarget(#[from] ConfigError),

    #[error("target {target} has no usable triggers: {reason}")]
    NoValidTriggers { target: String, reason: String },

    #[error("target {0} is not registered")]
    NotFound(String),
}
