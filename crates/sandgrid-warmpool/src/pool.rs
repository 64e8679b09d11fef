//! Warm pool manager and replenish loop.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use sandgrid_core::{ResourceLimit, TemplateId, WarmPoolEntry, epoch_secs};
use sandgrid_runtime::ContainerRuntime;
use sandgrid_scheduler::Scheduler;

/// Desired warm capacity for one template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmTarget {
    pub template_id: TemplateId,
    /// Idle entries to keep per healthy node.
    pub per_node: u32,
    /// Resources for pre-provisioned sandboxes of this template.
    pub resources: ResourceLimit,
}

/// Warm pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmPoolConfig {
    pub targets: Vec<WarmTarget>,
    /// Entries idle longer than this are destroyed regardless of target.
    pub max_idle_secs: u64,
}

impl Default for WarmPoolConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            max_idle_secs: 600,
        }
    }
}

/// Maintains pre-created idle sandboxes, keyed by template.
#[derive(Clone)]
pub struct WarmPool {
    config: WarmPoolConfig,
    entries: Arc<Mutex<HashMap<TemplateId, VecDeque<WarmPoolEntry>>>>,
    runtime: Arc<dyn ContainerRuntime>,
    scheduler: Scheduler,
}

impl WarmPool {
    pub fn new(
        config: WarmPoolConfig,
        runtime: Arc<dyn ContainerRuntime>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
            runtime,
            scheduler,
        }
    }

    /// Take the oldest idle entry for a template, if any.
    ///
    /// Never blocks on container creation; a miss tells the caller to
    /// cold-create through the scheduler. Entries already past the idle
    /// bound are discarded here rather than handed out.
    pub async fn acquire(&self, template_id: &str) -> Option<WarmPoolEntry> {
        let now = epoch_secs();
        let mut condemned = Vec::new();
        let mut acquired = None;
        {
            let mut entries = self.entries.lock().await;
            if let Some(queue) = entries.get_mut(template_id) {
                while let Some(entry) = queue.pop_front() {
                    if self.is_stale(&entry, now) {
                        condemned.push(entry);
                    } else {
                        acquired = Some(entry);
                        break;
                    }
                }
            }
        }

        for entry in condemned {
            self.destroy_entry(entry).await;
        }

        if let Some(ref entry) = acquired {
            debug!(
                %template_id,
                container_id = %entry.container_id,
                node_id = %entry.node_id,
                "warm pool hit"
            );
        }
        acquired
    }

    /// Return an entry to the pool with a fresh idle timestamp.
    pub async fn release_to_pool(&self, mut entry: WarmPoolEntry) {
        entry.idle_since = epoch_secs();
        let mut entries = self.entries.lock().await;
        entries
            .entry(entry.template_id.clone())
            .or_default()
            .push_back(entry);
    }

    /// Current idle count for a template.
    pub async fn idle_count(&self, template_id: &str) -> usize {
        let entries = self.entries.lock().await;
        entries.get(template_id).map_or(0, VecDeque::len)
    }

    /// One replenishment pass: evict stale entries, then top up every
    /// (template, node) pair to its target. Creation failures are
    /// logged and retried on the next tick — they never block callers.
    pub async fn replenish_once(&self) {
        self.evict_stale().await;

        let nodes = self.scheduler.healthy_nodes().await;
        for target in &self.config.targets {
            for node in &nodes {
                let current = self
                    .idle_count_on_node(&target.template_id, &node.id)
                    .await;
                let missing = target.per_node.saturating_sub(current as u32);

                for _ in 0..missing {
                    if !node.can_fit(&target.resources) {
                        debug!(
                            node_id = %node.id,
                            template_id = %target.template_id,
                            "node too full for warm capacity"
                        );
                        break;
                    }
                    match self.create_entry(node, target).await {
                        Ok(entry) => {
                            let mut entries = self.entries.lock().await;
                            entries
                                .entry(target.template_id.clone())
                                .or_default()
                                .push_back(entry);
                        }
                        Err(e) => {
                            warn!(
                                node_id = %node.id,
                                template_id = %target.template_id,
                                error = %e,
                                "warm create failed, retrying next tick"
                            );
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Run the replenishment loop until shutdown.
    pub async fn run(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(interval_secs = interval.as_secs(), "warm pool replenisher started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.replenish_once().await;
                }
                _ = shutdown.changed() => {
                    info!("warm pool replenisher shutting down");
                    break;
                }
            }
        }
    }

    /// Destroy all pooled containers (daemon shutdown).
    pub async fn drain(&self) {
        let drained: Vec<WarmPoolEntry> = {
            let mut entries = self.entries.lock().await;
            entries.drain().flat_map(|(_, q)| q).collect()
        };
        let count = drained.len();
        for entry in drained {
            self.destroy_entry(entry).await;
        }
        info!(count, "warm pool drained");
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn is_stale(&self, entry: &WarmPoolEntry, now: u64) -> bool {
        now.saturating_sub(entry.idle_since) > self.config.max_idle_secs
    }

    async fn idle_count_on_node(&self, template_id: &str, node_id: &str) -> usize {
        let entries = self.entries.lock().await;
        entries.get(template_id).map_or(0, |q| {
            q.iter().filter(|e| e.node_id == node_id).count()
        })
    }

    async fn create_entry(
        &self,
        node: &sandgrid_core::RuntimeNode,
        target: &WarmTarget,
    ) -> Result<WarmPoolEntry, sandgrid_runtime::RuntimeError> {
        let handle = self
            .runtime
            .create_container(node, &target.template_id, &target.resources)
            .await?;
        self.runtime.start_container(node, &handle.container_id).await?;

        // The image is cached on the node from now on.
        if let Err(e) = self
            .scheduler
            .add_cached_template(&node.id, &target.template_id)
            .await
        {
            warn!(node_id = %node.id, error = %e, "failed to record cached template");
        }

        let now = epoch_secs();
        debug!(
            node_id = %node.id,
            template_id = %target.template_id,
            container_id = %handle.container_id,
            "warm sandbox created"
        );
        Ok(WarmPoolEntry {
            template_id: target.template_id.clone(),
            node_id: node.id.clone(),
            container_id: handle.container_id,
            container_address: handle.address,
            created_at: now,
            idle_since: now,
        })
    }

    async fn evict_stale(&self) {
        let now = epoch_secs();
        let stale: Vec<WarmPoolEntry> = {
            let mut entries = self.entries.lock().await;
            let mut out = Vec::new();
            for queue in entries.values_mut() {
                // FIFO queues age front-to-back; split off the fresh tail.
                while queue.front().is_some_and(|e| self.is_stale(e, now)) {
                    if let Some(entry) = queue.pop_front() {
                        out.push(entry);
                    }
                }
            }
            out
        };

        for entry in stale {
            debug!(
                container_id = %entry.container_id,
                template_id = %entry.template_id,
                idle_secs = now.saturating_sub(entry.idle_since),
                "evicting stale warm entry"
            );
            self.destroy_entry(entry).await;
        }
    }

    async fn destroy_entry(&self, entry: WarmPoolEntry) {
        let Some(node) = self.scheduler.get_node(&entry.node_id).await else {
            warn!(node_id = %entry.node_id, "warm entry references unknown node");
            return;
        };
        if let Err(e) = self
            .runtime
            .destroy_container(&node, &entry.container_id)
            .await
        {
            warn!(
                container_id = %entry.container_id,
                error = %e,
                "failed to destroy warm container"
            );
        }
    }
}
