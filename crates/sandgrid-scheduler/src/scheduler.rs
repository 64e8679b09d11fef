//! Scheduler — runtime node registry and resource accounting.
//!
//! The registry map behind a single mutex is the authority for capacity.
//! Selection and reservation happen inside one critical section with no
//! await points, so two concurrent `schedule` calls can never both
//! admit the last slot on a node. Durable node records are written to
//! the state store after the lock drops.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use sandgrid_core::{NodeHealth, NodeId, ResourceLimit, RuntimeNode, TemplateId, epoch_secs};
use sandgrid_state::StateStore;

use crate::error::{SchedulerError, SchedulerResult};
use crate::select::select_node;

/// Schedules sessions onto runtime nodes and owns their capacity counters.
#[derive(Clone)]
pub struct Scheduler {
    nodes: Arc<Mutex<HashMap<NodeId, RuntimeNode>>>,
    state: StateStore,
}

impl Scheduler {
    /// Create a scheduler over an empty registry.
    pub fn new(state: StateStore) -> Self {
        Self {
            nodes: Arc::new(Mutex::new(HashMap::new())),
            state,
        }
    }

    /// Create a scheduler, reloading node records persisted by a
    /// previous process.
    pub fn with_recovered_nodes(state: StateStore) -> SchedulerResult<Self> {
        let recovered = state.list_nodes()?;
        let mut nodes = HashMap::new();
        for node in recovered {
            nodes.insert(node.id.clone(), node);
        }
        info!(count = nodes.len(), "node registry recovered from state store");
        Ok(Self {
            nodes: Arc::new(Mutex::new(nodes)),
            state,
        })
    }

    // ── Registration ───────────────────────────────────────────────

    /// Register a node. Fails if the id is taken or the capacity
    /// invariants don't hold.
    pub async fn register_node(&self, node: RuntimeNode) -> SchedulerResult<()> {
        if node.allocated_cpu > node.total_cpu || node.allocated_memory_mb > node.total_memory_mb {
            return Err(SchedulerError::InvalidNode(format!(
                "node {} allocates more than its capacity",
                node.id
            )));
        }
        if node.max_sessions == 0 {
            return Err(SchedulerError::InvalidNode(format!(
                "node {} has zero session slots",
                node.id
            )));
        }

        {
            let mut nodes = self.nodes.lock().await;
            if nodes.contains_key(&node.id) {
                return Err(SchedulerError::AlreadyRegistered(node.id));
            }
            nodes.insert(node.id.clone(), node.clone());
        }

        self.state.put_node(&node)?;
        info!(node_id = %node.id, engine = ?node.engine, "node registered");
        Ok(())
    }

    /// Deregister a node, removing it from selection and the store.
    pub async fn deregister_node(&self, node_id: &str) -> SchedulerResult<()> {
        let removed = {
            let mut nodes = self.nodes.lock().await;
            nodes.remove(node_id)
        };
        if removed.is_none() {
            return Err(SchedulerError::NodeNotFound(node_id.to_string()));
        }

        self.state.delete_node(node_id)?;
        info!(%node_id, "node deregistered");
        Ok(())
    }

    // ── Scheduling ─────────────────────────────────────────────────

    /// Pick a node for a new session and reserve its resources.
    ///
    /// Selection and reservation share one critical section; the
    /// returned snapshot reflects the node after the reservation.
    pub async fn schedule(
        &self,
        template_id: &TemplateId,
        resources: &ResourceLimit,
    ) -> SchedulerResult<RuntimeNode> {
        let reserved = {
            let mut nodes = self.nodes.lock().await;
            let chosen_id = select_node(nodes.values(), template_id, resources)
                .map(|n| n.id.clone())
                .ok_or_else(|| {
                    SchedulerError::NodeUnavailable(format!(
                        "no healthy node can fit template {template_id}"
                    ))
                })?;

            let node = nodes
                .get_mut(&chosen_id)
                .ok_or_else(|| SchedulerError::NodeNotFound(chosen_id.clone()))?;
            reserve(node, resources);
            node.clone()
        };

        self.state.put_node(&reserved)?;
        debug!(
            node_id = %reserved.id,
            %template_id,
            sessions = reserved.session_count,
            "session scheduled"
        );
        Ok(reserved)
    }

    /// Reserve capacity on a specific node (warm-pool adoption path).
    ///
    /// Fails if the node is missing, not healthy, or cannot fit the
    /// request — the caller then falls back to the cold path.
    pub async fn reserve_on(
        &self,
        node_id: &str,
        resources: &ResourceLimit,
    ) -> SchedulerResult<RuntimeNode> {
        let reserved = {
            let mut nodes = self.nodes.lock().await;
            let node = nodes
                .get_mut(node_id)
                .ok_or_else(|| SchedulerError::NodeNotFound(node_id.to_string()))?;
            if node.health != NodeHealth::Healthy || !node.can_fit(resources) {
                return Err(SchedulerError::NodeUnavailable(format!(
                    "node {node_id} cannot fit the request"
                )));
            }
            reserve(node, resources);
            node.clone()
        };

        self.state.put_node(&reserved)?;
        Ok(reserved)
    }

    /// Return a session's resources to its node. The inverse of the
    /// reservation made at schedule time; saturates rather than
    /// underflowing if called twice.
    pub async fn release(&self, node_id: &str, resources: &ResourceLimit) -> SchedulerResult<()> {
        let released = {
            let mut nodes = self.nodes.lock().await;
            let node = nodes
                .get_mut(node_id)
                .ok_or_else(|| SchedulerError::NodeNotFound(node_id.to_string()))?;
            node.allocated_cpu = (node.allocated_cpu - resources.cpu_cores).max(0.0);
            node.allocated_memory_mb = node.allocated_memory_mb.saturating_sub(resources.memory_mb);
            node.session_count = node.session_count.saturating_sub(1);
            node.clone()
        };

        self.state.put_node(&released)?;
        debug!(%node_id, sessions = released.session_count, "resources released");
        Ok(())
    }

    // ── Health ─────────────────────────────────────────────────────

    /// Exclude a node from future selection. Idempotent.
    pub async fn mark_node_unhealthy(&self, node_id: &str) -> SchedulerResult<()> {
        let updated = {
            let mut nodes = self.nodes.lock().await;
            let node = nodes
                .get_mut(node_id)
                .ok_or_else(|| SchedulerError::NodeNotFound(node_id.to_string()))?;
            if node.health == NodeHealth::Unhealthy {
                return Ok(());
            }
            node.health = NodeHealth::Unhealthy;
            node.clone()
        };

        self.state.put_node(&updated)?;
        warn!(%node_id, "node marked unhealthy");
        Ok(())
    }

    /// Record a node heartbeat. An unhealthy node recovers to healthy;
    /// draining nodes stay draining.
    pub async fn record_heartbeat(&self, node_id: &str) -> SchedulerResult<()> {
        let updated = {
            let mut nodes = self.nodes.lock().await;
            let node = nodes
                .get_mut(node_id)
                .ok_or_else(|| SchedulerError::NodeNotFound(node_id.to_string()))?;
            node.last_heartbeat = epoch_secs();
            if node.health == NodeHealth::Unhealthy {
                info!(%node_id, "node recovered to healthy");
                node.health = NodeHealth::Healthy;
            }
            node.clone()
        };

        self.state.put_node(&updated)?;
        Ok(())
    }

    /// Record that a template's image is now cached on a node.
    pub async fn add_cached_template(
        &self,
        node_id: &str,
        template_id: &TemplateId,
    ) -> SchedulerResult<()> {
        let updated = {
            let mut nodes = self.nodes.lock().await;
            let node = nodes
                .get_mut(node_id)
                .ok_or_else(|| SchedulerError::NodeNotFound(node_id.to_string()))?;
            if !node.cached_templates.insert(template_id.clone()) {
                return Ok(());
            }
            node.clone()
        };

        self.state.put_node(&updated)?;
        Ok(())
    }

    // ── Snapshots ──────────────────────────────────────────────────

    /// Snapshot of all healthy nodes.
    pub async fn healthy_nodes(&self) -> Vec<RuntimeNode> {
        let nodes = self.nodes.lock().await;
        nodes
            .values()
            .filter(|n| n.health == NodeHealth::Healthy)
            .cloned()
            .collect()
    }

    /// Snapshot of every registered node.
    pub async fn list_nodes(&self) -> Vec<RuntimeNode> {
        let nodes = self.nodes.lock().await;
        nodes.values().cloned().collect()
    }

    /// Snapshot of a single node.
    pub async fn get_node(&self, node_id: &str) -> Option<RuntimeNode> {
        let nodes = self.nodes.lock().await;
        nodes.get(node_id).cloned()
    }
}

fn reserve(node: &mut RuntimeNode, resources: &ResourceLimit) {
    node.allocated_cpu += resources.cpu_cores;
    node.allocated_memory_mb += resources.memory_mb;
    node.session_count += 1;
}
