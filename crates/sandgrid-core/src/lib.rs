//! sandgrid-core — domain model for the SandGrid control plane.
//!
//! Defines the value types shared by every subsystem (runtime nodes,
//! sessions, executions, warm-pool entries, resource limits), the
//! session/execution lifecycle state machines, and the caller-facing
//! error taxonomy.
//!
//! This crate is pure data + validation: no I/O, no async. Status
//! mutations on [`Session`] and [`Execution`] must go through the
//! checked `transition_to` helpers — no component assigns status
//! directly.

pub mod error;
pub mod status;
pub mod types;

pub use error::{DomainError, DomainResult};
pub use status::{ExecutionStatus, SessionStatus};
pub use types::*;
