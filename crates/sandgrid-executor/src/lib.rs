//! sandgrid-executor — the control plane's client for in-container
//! executor agents.
//!
//! Owns everything about talking to an untrusted, possibly slow or
//! crashing agent: request dispatch over HTTP/1, a bounded per-call
//! timeout independent of the handler's declared timeout, capped
//! exponential backoff with jitter, and a per-node consecutive-failure
//! tracker that drives circuit breaking.
//!
//! # Architecture
//!
//! ```text
//! ExecutorClient
//!   ├── dispatch_once()  → one POST /execute, classified errors
//!   ├── retry_with()     → explicit retry loop over a pure
//!   │                      RetryPolicy (attempt → delay)
//!   └── kill()           → best-effort POST /executions/{id}/kill
//! NodeFailureTracker     → consecutive failures per node; crossing the
//!                          threshold tells the caller to mark the node
//!                          unhealthy
//! ```
//!
//! A 4xx from the agent is a [`ExecutorError::Validation`] and is never
//! retried; connection errors, timeouts, and 5xx are transient and
//! retried until the policy is exhausted.

pub mod client;
pub mod error;
pub mod failure;
pub mod protocol;
pub mod retry;

pub use client::{ExecutorClient, ExecutorClientConfig};
pub use error::{ExecutorError, ExecutorResult};
pub use failure::NodeFailureTracker;
pub use protocol::{ExecuteAck, ExecuteRequest, ResultReport};
pub use retry::{RetryPolicy, retry_with};
