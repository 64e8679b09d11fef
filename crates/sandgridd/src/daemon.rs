//! Daemon assembly — explicit two-phase lifecycle.
//!
//! `Daemon::init` constructs every subsystem once and wires them into a
//! single context; `Daemon::shutdown` drains the background loops and
//! the warm pool. Nothing lives in module-level state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use sandgrid_core::{NodeHealth, RuntimeNode, epoch_secs};
use sandgrid_executor::{ExecutorClient, ExecutorClientConfig, RetryPolicy};
use sandgrid_lifecycle::{LifecycleConfig, Reaper, ResultRouter, SessionManager};
use sandgrid_runtime::{ContainerRuntime, StubRuntime};
use sandgrid_scheduler::{Scheduler, SchedulerError};
use sandgrid_state::StateStore;
use sandgrid_warmpool::{WarmPool, WarmPoolConfig, WarmTarget};

use crate::config::DaemonConfig;

/// The assembled control plane.
pub struct Daemon {
    pub manager: SessionManager,
    pub warm_pool: WarmPool,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Daemon {
    /// Initialize every subsystem and start the background loops.
    pub async fn init(config: &DaemonConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.server.data_dir)
            .with_context(|| format!("creating data dir {}", config.server.data_dir.display()))?;
        let db_path = config.server.data_dir.join("sandgrid.redb");
        let state = StateStore::open(&db_path)?;
        info!(path = ?db_path, "state store opened");

        let scheduler = Scheduler::with_recovered_nodes(state.clone())?;
        for node in &config.nodes {
            let record = RuntimeNode {
                id: node.id.clone(),
                engine: node.engine,
                endpoint: node.endpoint.clone(),
                health: NodeHealth::Healthy,
                total_cpu: node.total_cpu,
                total_memory_mb: node.total_memory_mb,
                allocated_cpu: 0.0,
                allocated_memory_mb: 0,
                session_count: 0,
                max_sessions: node.max_sessions,
                cached_templates: Default::default(),
                last_heartbeat: epoch_secs(),
            };
            match scheduler.register_node(record).await {
                Ok(()) => {}
                Err(SchedulerError::AlreadyRegistered(_)) => {
                    // Recovered from the store on a previous run.
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!(nodes = scheduler.list_nodes().await.len(), "scheduler initialized");

        let runtime: Arc<dyn ContainerRuntime> = match config.runtime.engine.as_str() {
            "stub" => Arc::new(StubRuntime::new()),
            other => bail!("unsupported runtime engine: {other}"),
        };
        info!(engine = %config.runtime.engine, "container runtime initialized");

        let executor = ExecutorClient::new(ExecutorClientConfig {
            agent_port: config.executor.agent_port,
            request_timeout: config.request_timeout(),
            retry: RetryPolicy {
                max_retries: config.executor.max_retries,
                base_delay: Duration::from_millis(config.executor.base_delay_ms),
                max_delay: Duration::from_millis(config.executor.max_delay_ms),
                jitter: 0.2,
            },
        });

        let mut targets = Vec::new();
        for target in &config.warm_pool.targets {
            targets.push(WarmTarget {
                template_id: target.template_id.clone(),
                per_node: target.per_node,
                resources: target
                    .resources()
                    .with_context(|| format!("warm pool target {}", target.template_id))?,
            });
        }
        let warm_pool = WarmPool::new(
            WarmPoolConfig {
                targets,
                max_idle_secs: config.warm_pool.max_idle_secs,
            },
            runtime.clone(),
            scheduler.clone(),
        );
        info!(
            targets = config.warm_pool.targets.len(),
            "warm pool initialized"
        );

        let router = ResultRouter::spawn(state.clone());
        let manager = SessionManager::new(
            state.clone(),
            scheduler,
            warm_pool.clone(),
            runtime,
            executor.clone(),
            router,
            LifecycleConfig {
                templates: config.lifecycle.templates.clone(),
                default_session_timeout_secs: config.lifecycle.default_session_timeout_secs,
                default_execution_timeout_secs: config.lifecycle.default_execution_timeout_secs,
                max_execution_timeout_secs: config.lifecycle.max_execution_timeout_secs,
                callback_base_url: config.server.callback_base_url.clone(),
                callback_secret: config.server.callback_secret.clone(),
                node_failure_threshold: config.executor.node_failure_threshold,
            },
        );
        let reaper = Reaper::new(state, manager.clone(), executor);

        // Background loops.
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let replenish_interval = Duration::from_secs(config.warm_pool.replenish_interval_secs);
        let pool_loop = warm_pool.clone();
        let pool_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            pool_loop.run(replenish_interval, pool_shutdown).await;
        }));

        let reaper_interval = Duration::from_secs(config.reaper.interval_secs);
        let reaper_shutdown = shutdown_rx;
        tasks.push(tokio::spawn(async move {
            reaper.run(reaper_interval, reaper_shutdown).await;
        }));

        Ok(Self {
            manager,
            warm_pool,
            shutdown_tx,
            tasks,
        })
    }

    /// Build the API router over this daemon's manager.
    pub fn router(&self) -> axum::Router {
        sandgrid_api::build_router(self.manager.clone())
    }

    /// Stop background loops and tear down pooled sandboxes.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        self.warm_pool.drain().await;
        info!("daemon stopped");
    }
}
