//! Domain error taxonomy.
//!
//! These are the caller-facing, expected failure conditions. At the API
//! boundary they map to 4xx-equivalent responses; infrastructure faults
//! (executor transport, state store) live in their own crates and map
//! to 5xx.

use thiserror::Error;

/// Result type alias for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

/// Expected, caller-facing failure conditions.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidStatus { from: String, to: String },

    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("execution timed out: {0}")]
    ExecutionTimeout(String),

    #[error("execution crashed: {0}")]
    ExecutionCrashed(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("no runtime node available: {0}")]
    NodeUnavailable(String),
}
