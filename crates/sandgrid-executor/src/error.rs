//! Executor client error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for executor client operations.
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Failures talking to an executor agent.
///
/// Everything except [`ExecutorError::Validation`] is transient: the
/// retry loop backs off and tries again until the policy is exhausted.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("connection to executor agent failed: {0}")]
    Connection(String),

    #[error("executor agent request timed out after {0:?}")]
    Timeout(Duration),

    #[error("executor agent unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected executor response (status {status}): {body}")]
    Response { status: u16, body: String },

    #[error("executor rejected request: {0}")]
    Validation(String),
}

impl ExecutorError {
    /// Whether the retry loop should try again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation(_))
    }
}
