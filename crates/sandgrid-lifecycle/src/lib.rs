//! sandgrid-lifecycle — session and execution orchestration.
//!
//! Ties the scheduler, warm pool, runtime capability, and executor
//! client together into the operations the API surface exposes:
//!
//! - [`SessionManager`] — create (warm-pool fast path, cold fallback),
//!   terminate, expire, heartbeat
//! - execution submit/dispatch with retry exhaustion mapping to FAILED
//! - [`ResultRouter`] — the single applier task all execution status
//!   transitions flow through (agent callbacks, dispatch outcomes,
//!   reaper timeouts), making "first transition wins, the rest are
//!   idempotent duplicates" an ordering property instead of a locking
//!   problem
//! - [`Reaper`] — the heartbeat monitor / idle sweep, the sole path by
//!   which silent executions and sessions are reclaimed

pub mod auth;
pub mod error;
pub mod manager;
pub mod reaper;
pub mod router;

pub use auth::callback_token;
pub use error::{LifecycleError, LifecycleResult};
pub use manager::{CreateSessionRequest, LifecycleConfig, SessionManager, SubmitExecutionRequest};
pub use reaper::Reaper;
pub use router::{AppliedOutcome, ResultRouter};
