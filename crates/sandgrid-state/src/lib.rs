//! sandgrid-state — embedded state store for the SandGrid control plane.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and
//! in-memory state management for sessions, executions, and runtime
//! nodes.
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value
//! columns. The `StateStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks. The core
//! treats it as a key-value contract with read-after-write consistency;
//! in-memory registries (scheduler node table, warm pool) remain the
//! authority for scheduling decisions, the store makes lifecycle state
//! durable across restarts.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;
