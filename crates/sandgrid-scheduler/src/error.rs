//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no runtime node available: {0}")]
    NodeUnavailable(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("node already registered: {0}")]
    AlreadyRegistered(String),

    #[error("invalid node definition: {0}")]
    InvalidNode(String),

    #[error("state store error: {0}")]
    State(#[from] sandgrid_state::StateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
