//! sandgrid-runtime — the container engine capability boundary.
//!
//! The control plane never talks to a container engine SDK directly; it
//! consumes the [`ContainerRuntime`] trait. Backends are selected by
//! configuration (`engine = "docker" | "kubernetes" | "stub"`), never by
//! subclassing a concrete default. This crate ships [`StubRuntime`], an
//! in-process backend used by development mode and the test suites;
//! engine-specific backends live outside the core.
//!
//! Any backend failure surfaces as a generic [`RuntimeError`] — the
//! scheduler and warm pool treat it as a failed attempt (retry next
//! tick, or fall back to the cold path).

pub mod stub;

pub use stub::StubRuntime;

use async_trait::async_trait;
use thiserror::Error;

use sandgrid_core::{ResourceLimit, RuntimeNode, TemplateId};

/// Result type alias for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Generic infrastructure error from a container backend.
#[derive(Debug, Error)]
#[error("runtime error: {0}")]
pub struct RuntimeError(pub String);

/// A created container, addressable by the executor client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub container_id: String,
    /// Network identity of the container (host or IP, no port — the
    /// executor client appends the fixed agent port).
    pub address: String,
}

/// Capability contract for a container engine backend.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a sandbox container for a template on the given node.
    /// The container is created stopped; call [`Self::start_container`].
    async fn create_container(
        &self,
        node: &RuntimeNode,
        template_id: &TemplateId,
        resources: &ResourceLimit,
    ) -> RuntimeResult<ContainerHandle>;

    /// Start a previously created container.
    async fn start_container(&self, node: &RuntimeNode, container_id: &str) -> RuntimeResult<()>;

    /// Stop a running container.
    async fn stop_container(&self, node: &RuntimeNode, container_id: &str) -> RuntimeResult<()>;

    /// Destroy a container and release its node-side resources.
    async fn destroy_container(&self, node: &RuntimeNode, container_id: &str)
    -> RuntimeResult<()>;

    /// Probe the in-container executor agent. `true` means ready.
    async fn exec_health_check(
        &self,
        node: &RuntimeNode,
        container_id: &str,
    ) -> RuntimeResult<bool>;

    /// Fetch the last `tail` lines of container logs.
    async fn get_logs(
        &self,
        node: &RuntimeNode,
        container_id: &str,
        tail: usize,
    ) -> RuntimeResult<String>;
}
