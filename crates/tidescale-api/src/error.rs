//! Query surface errors.

use thiserror::Error;

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// No registered target in the namespace publishes the metric. This is
    /// an expected answer for removed or not-yet-evaluated targets.
    #[error("metric {metric} not found in namespace {namespace}")]
    NotFound { namespace: String, metric: String },

    #[error("invalid label selector: {0}")]
    InvalidSelector(String),
}
