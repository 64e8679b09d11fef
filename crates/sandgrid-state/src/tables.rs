//! redb table definitions for the SandGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized
//! domain types).

use redb::TableDefinition;

/// Sessions keyed by `{session_id}`.
pub const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Executions keyed by `{execution_id}` (session id lives in the value —
/// result callbacks look executions up without knowing the session).
pub const EXECUTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("executions");

/// Runtime nodes keyed by `{node_id}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");
