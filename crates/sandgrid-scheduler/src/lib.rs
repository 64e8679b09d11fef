//! sandgrid-scheduler — runtime node selection and resource accounting.
//!
//! Maps new sessions to runtime nodes. The scheduler:
//!
//! - Keeps the in-memory node registry that is the authority for
//!   capacity decisions (the state store is a durable mirror)
//! - Filters to healthy nodes and prefers nodes with the requested
//!   template already cached (affinity)
//! - Picks the least-loaded candidate with deterministic tie-breaking
//! - Reserves and releases per-node resources atomically with selection
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//!   ├── Mutex<HashMap<NodeId, RuntimeNode>>  (single critical section
//!   │     for select + reserve — concurrent schedulers can never
//!   │     observe stale capacity)
//!   └── StateStore (durable node records, written after the lock drops)
//! ```

pub mod error;
pub mod scheduler;
pub mod select;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::Scheduler;
pub use select::select_node;
