//! In-process stub container backend.
//!
//! Tracks containers in a shared map and counts create/destroy calls so
//! tests can assert on warm-pool hits vs. cold creates. Supports failure
//! injection for exercising the retry-next-tick paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use sandgrid_core::{ResourceLimit, RuntimeNode, TemplateId};

use crate::{ContainerHandle, ContainerRuntime, RuntimeError, RuntimeResult};

#[derive(Debug, Clone)]
struct StubContainer {
    template_id: TemplateId,
    node_id: String,
    running: bool,
}

/// Stub backend: containers are rows in a map, the agent is always ready.
#[derive(Clone, Default)]
pub struct StubRuntime {
    containers: Arc<Mutex<HashMap<String, StubContainer>>>,
    next_id: Arc<AtomicU64>,
    creates: Arc<AtomicU64>,
    destroys: Arc<AtomicU64>,
    fail_creates: Arc<AtomicBool>,
}

impl StubRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make all subsequent `create_container` calls fail.
    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Total `create_container` calls (cold creates) so far.
    pub fn create_count(&self) -> u64 {
        self.creates.load(Ordering::SeqCst)
    }

    /// Total `destroy_container` calls so far.
    pub fn destroy_count(&self) -> u64 {
        self.destroys.load(Ordering::SeqCst)
    }

    /// Number of containers currently alive.
    pub async fn live_count(&self) -> usize {
        self.containers.lock().await.len()
    }

    /// Whether a container exists and is running.
    pub async fn is_running(&self, container_id: &str) -> bool {
        self.containers
            .lock()
            .await
            .get(container_id)
            .is_some_and(|c| c.running)
    }
}

#[async_trait]
impl ContainerRuntime for StubRuntime {
    async fn create_container(
        &self,
        node: &RuntimeNode,
        template_id: &TemplateId,
        _resources: &ResourceLimit,
    ) -> RuntimeResult<ContainerHandle> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(RuntimeError("injected create failure".to_string()));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let container_id = format!("stub-{n:08x}");
        self.creates.fetch_add(1, Ordering::SeqCst);

        self.containers.lock().await.insert(
            container_id.clone(),
            StubContainer {
                template_id: template_id.clone(),
                node_id: node.id.clone(),
                running: false,
            },
        );

        debug!(%container_id, %template_id, node = %node.id, "stub container created");
        Ok(ContainerHandle {
            container_id,
            address: "127.0.0.1".to_string(),
        })
    }

    async fn start_container(&self, _node: &RuntimeNode, container_id: &str) -> RuntimeResult<()> {
        let mut containers = self.containers.lock().await;
        let container = containers
            .get_mut(container_id)
            .ok_or_else(|| RuntimeError(format!("unknown container: {container_id}")))?;
        container.running = true;
        Ok(())
    }

    async fn stop_container(&self, _node: &RuntimeNode, container_id: &str) -> RuntimeResult<()> {
        let mut containers = self.containers.lock().await;
        let container = containers
            .get_mut(container_id)
            .ok_or_else(|| RuntimeError(format!("unknown container: {container_id}")))?;
        container.running = false;
        Ok(())
    }

    async fn destroy_container(
        &self,
        _node: &RuntimeNode,
        container_id: &str,
    ) -> RuntimeResult<()> {
        let removed = self.containers.lock().await.remove(container_id);
        if removed.is_none() {
            return Err(RuntimeError(format!("unknown container: {container_id}")));
        }
        self.destroys.fetch_add(1, Ordering::SeqCst);
        debug!(%container_id, "stub container destroyed");
        Ok(())
    }

    async fn exec_health_check(
        &self,
        _node: &RuntimeNode,
        container_id: &str,
    ) -> RuntimeResult<bool> {
        Ok(self
            .containers
            .lock()
            .await
            .get(container_id)
            .is_some_and(|c| c.running))
    }

    async fn get_logs(
        &self,
        _node: &RuntimeNode,
        container_id: &str,
        _tail: usize,
    ) -> RuntimeResult<String> {
        let containers = self.containers.lock().await;
        let container = containers
            .get(container_id)
            .ok_or_else(|| RuntimeError(format!("unknown container: {container_id}")))?;
        Ok(format!(
            "[stub] container {container_id} template {} node {}\n",
            container.template_id, container.node_id
        ))
    }
}
