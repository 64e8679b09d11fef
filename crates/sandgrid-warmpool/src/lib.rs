//! sandgrid-warmpool — pre-provisioned sandbox pool.
//!
//! Session creation prefers adopting a warm sandbox over a cold create.
//! The pool keeps a configurable number of idle containers per
//! (template, node) pair, replenished by a background loop and bounded
//! by a max-idle eviction policy.
//!
//! # Policy
//!
//! ```text
//! acquire(template)   → oldest idle entry for the template (FIFO),
//!                       never blocks; miss ⇒ caller cold-creates
//! release_to_pool(e)  → entry returns with a fresh idle_since
//! replenish tick      → evict entries idle past max_idle, then
//!                       cold-create up to per-node target; failures
//!                       are logged and retried next tick
//! ```
//!
//! Warm entries are not sessions: they hold no scheduler reservation.
//! Adoption reserves capacity through `Scheduler::reserve_on`; if the
//! entry's node can no longer fit the request the caller returns the
//! entry and falls back to the cold path.

pub mod pool;

pub use pool::{WarmPool, WarmPoolConfig, WarmTarget};
