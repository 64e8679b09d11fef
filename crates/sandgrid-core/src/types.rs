//! Domain types for the SandGrid control plane.
//!
//! These types represent the persisted state of runtime nodes, sessions,
//! executions, and warm-pool entries. All types are serializable to/from
//! JSON for storage. Timestamps are Unix epoch seconds.

use std::collections::{BTreeSet, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::status::{ExecutionStatus, SessionStatus};

/// Unique identifier for a runtime node.
pub type NodeId = String;

/// Unique identifier for a session.
pub type SessionId = String;

/// Unique identifier for an execution within a session.
pub type ExecutionId = String;

/// Identifier for a sandbox template (base image + preinstalled deps).
pub type TemplateId = String;

// ── Runtime node ───────────────────────────────────────────────────

/// Which container engine backs a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Docker,
    Kubernetes,
    /// In-process fake engine for development and tests.
    Stub,
}

/// Health status of a runtime node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeHealth {
    Healthy,
    Unhealthy,
    Draining,
}

/// A host capable of creating and running sandbox containers.
///
/// Capacity counters (`allocated_*`, `session_count`) are mutated only
/// by the scheduler; health is mutated only by the scheduler's
/// unhealthy-marking path and the heartbeat monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeNode {
    pub id: NodeId,
    pub engine: EngineKind,
    /// Engine API endpoint (e.g. `10.0.0.4:2375`).
    pub endpoint: String,
    pub health: NodeHealth,
    pub total_cpu: f64,
    pub total_memory_mb: u64,
    pub allocated_cpu: f64,
    pub allocated_memory_mb: u64,
    pub session_count: u32,
    pub max_sessions: u32,
    /// Template ids with images already cached on this node.
    pub cached_templates: BTreeSet<TemplateId>,
    /// Unix timestamp of last node heartbeat.
    pub last_heartbeat: u64,
}

impl RuntimeNode {
    /// Fraction of session slots in use. A node with no slots is full.
    pub fn load_ratio(&self) -> f64 {
        if self.max_sessions == 0 {
            1.0
        } else {
            f64::from(self.session_count) / f64::from(self.max_sessions)
        }
    }

    /// Whether this node has room for one more session with the given limits.
    pub fn can_fit(&self, limit: &ResourceLimit) -> bool {
        self.session_count < self.max_sessions
            && self.allocated_cpu + limit.cpu_cores <= self.total_cpu
            && self.allocated_memory_mb + limit.memory_mb <= self.total_memory_mb
    }

    /// Whether the template's image is already cached here.
    pub fn has_template(&self, template_id: &str) -> bool {
        self.cached_templates.contains(template_id)
    }
}

// ── Resource limits ────────────────────────────────────────────────

/// Per-session resource limits. Validated at construction; treat as
/// immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceLimit {
    pub cpu_cores: f64,
    pub memory_mb: u64,
    pub disk_mb: u64,
}

impl ResourceLimit {
    /// Build a validated resource limit.
    pub fn new(cpu_cores: f64, memory_mb: u64, disk_mb: u64) -> DomainResult<Self> {
        if !cpu_cores.is_finite() || cpu_cores <= 0.0 {
            return Err(DomainError::Validation(format!(
                "cpu_cores must be a positive number, got {cpu_cores}"
            )));
        }
        if memory_mb == 0 {
            return Err(DomainError::Validation("memory_mb must be positive".to_string()));
        }
        if disk_mb == 0 {
            return Err(DomainError::Validation("disk_mb must be positive".to_string()));
        }
        Ok(Self {
            cpu_cores,
            memory_mb,
            disk_mb,
        })
    }
}

// ── Session ────────────────────────────────────────────────────────

/// A provisioned sandbox container bound to one runtime node, hosting
/// zero or more executions over its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub template_id: TemplateId,
    /// Back-reference only — the node does not own the session.
    pub node_id: NodeId,
    pub container_id: String,
    /// Network identity of the container; the executor client appends
    /// the fixed agent port.
    pub container_address: String,
    pub resources: ResourceLimit,
    pub status: SessionStatus,
    /// Idle timeout in seconds; the reaper expires the session once
    /// `last_heartbeat_at` is older than this.
    pub timeout_secs: u64,
    /// Environment variables injected into the container.
    pub env: HashMap<String, String>,
    pub created_at: u64,
    pub last_heartbeat_at: u64,
}

// ── Execution ──────────────────────────────────────────────────────

/// Resource usage reported by the executor agent for one invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionMetrics {
    pub duration_ms: u64,
    pub cpu_time_ms: u64,
    pub peak_memory_mb: u64,
}

/// A file artifact produced by an execution, described by reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactRef {
    pub path: String,
    pub size_bytes: u64,
    pub mime_type: String,
    /// Hex-encoded SHA-256 of the file contents, computed by the agent.
    pub checksum: String,
}

/// One handler-code invocation within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub id: ExecutionId,
    pub session_id: SessionId,
    pub code: String,
    pub language: String,
    /// Event payload handed to the handler.
    pub event: serde_json::Value,
    /// Declared handler timeout in seconds, enforced by the reaper.
    pub timeout_secs: u64,
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub return_value: Option<serde_json::Value>,
    pub metrics: Option<ExecutionMetrics>,
    /// Dispatch attempts consumed so far.
    pub retry_count: u32,
    pub artifacts: Vec<ArtifactRef>,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub last_heartbeat_at: u64,
}

// ── Warm pool ──────────────────────────────────────────────────────

/// A pre-created idle sandbox waiting to be adopted by a new session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarmPoolEntry {
    pub template_id: TemplateId,
    pub node_id: NodeId,
    pub container_id: String,
    pub container_address: String,
    pub created_at: u64,
    pub idle_since: u64,
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
