//! Lifecycle error types.
//!
//! Domain conditions pass through unchanged so the API layer can map
//! them to 4xx responses; infrastructure faults carry their source.

use thiserror::Error;

use sandgrid_core::DomainError;
use sandgrid_executor::ExecutorError;
use sandgrid_runtime::RuntimeError;
use sandgrid_scheduler::SchedulerError;
use sandgrid_state::StateError;

/// Result type alias for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Errors from session/execution orchestration.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SchedulerError> for LifecycleError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::NodeUnavailable(msg) => {
                Self::Domain(DomainError::NodeUnavailable(msg))
            }
            SchedulerError::NodeNotFound(msg) => Self::Domain(DomainError::NotFound(msg)),
            SchedulerError::AlreadyRegistered(msg) | SchedulerError::InvalidNode(msg) => {
                Self::Domain(DomainError::Validation(msg))
            }
            SchedulerError::State(e) => Self::State(e),
        }
    }
}

impl LifecycleError {
    /// Whether this is a caller-facing domain condition (4xx) rather
    /// than an infrastructure fault (5xx).
    pub fn is_domain(&self) -> bool {
        matches!(self, Self::Domain(_))
    }
}
