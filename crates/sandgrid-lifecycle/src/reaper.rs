//! Heartbeat monitor / idle reaper.
//!
//! The only timeout enforcement in the system: a fixed-period sweep
//! that forces TIMEOUT on executions whose agents went silent and
//! EXPIRED on sessions with no activity past their declared timeout.
//! Kills against the agent are fire-and-forget; a failed kill never
//! blocks the control-plane transition.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use sandgrid_core::{SessionStatus, epoch_secs};
use sandgrid_executor::ExecutorClient;
use sandgrid_state::StateStore;

use crate::manager::SessionManager;

/// Background sweep over non-terminal executions and sessions.
#[derive(Clone)]
pub struct Reaper {
    state: StateStore,
    manager: SessionManager,
    executor: ExecutorClient,
}

impl Reaper {
    pub fn new(state: StateStore, manager: SessionManager, executor: ExecutorClient) -> Self {
        Self {
            state,
            manager,
            executor,
        }
    }

    /// One full sweep: executions first (so a dead execution cannot
    /// keep its session's heartbeat fresh), then sessions.
    pub async fn sweep_once(&self) {
        let now = epoch_secs();
        self.sweep_executions(now).await;
        self.sweep_sessions(now).await;
    }

    async fn sweep_executions(&self, now: u64) {
        let executions = match self.state.list_executions() {
            Ok(executions) => executions,
            Err(e) => {
                error!(error = %e, "reaper failed to list executions");
                return;
            }
        };

        for exec in executions {
            if exec.status.is_terminal() {
                continue;
            }
            if now.saturating_sub(exec.last_heartbeat_at) <= exec.timeout_secs {
                continue;
            }

            match self.manager.router().force_timeout(&exec.id).await {
                Ok(true) => self.kill_agent_side(&exec.id, &exec.session_id),
                Ok(false) => {
                    // A result landed between the read and the mailbox.
                    debug!(execution_id = %exec.id, "timeout superseded by a result");
                }
                Err(e) => {
                    warn!(execution_id = %exec.id, error = %e, "timeout transition failed");
                }
            }
        }
    }

    /// Fire-and-forget kill of the timed-out handler inside its container.
    fn kill_agent_side(&self, execution_id: &str, session_id: &str) {
        let session = match self.manager.get_session(session_id) {
            Ok(session) => session,
            Err(e) => {
                debug!(%session_id, error = %e, "no session for kill, skipping");
                return;
            }
        };

        let executor = self.executor.clone();
        let address = session.container_address;
        let execution_id = execution_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = executor.kill(&address, &execution_id).await {
                debug!(%execution_id, error = %e, "agent kill failed (best-effort)");
            }
        });
    }

    async fn sweep_sessions(&self, now: u64) {
        let sessions = match self.state.list_sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                error!(error = %e, "reaper failed to list sessions");
                return;
            }
        };

        for session in sessions {
            if session.status != SessionStatus::Running {
                continue;
            }
            if now.saturating_sub(session.last_heartbeat_at) <= session.timeout_secs {
                continue;
            }

            match self.manager.expire_session(&session.id, now).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(session_id = %session.id, "expiry superseded by activity");
                }
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "session expiry failed");
                }
            }
        }
    }

    /// Run the sweep loop until shutdown.
    pub async fn run(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(interval_secs = interval.as_secs(), "reaper started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.sweep_once().await;
                }
                _ = shutdown.changed() => {
                    info!("reaper shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Arc;

    use sandgrid_core::{
        EngineKind, Execution, ExecutionStatus, NodeHealth, ResourceLimit, RuntimeNode,
    };
    use sandgrid_executor::{ExecutorClientConfig, RetryPolicy};
    use sandgrid_runtime::StubRuntime;
    use sandgrid_scheduler::Scheduler;
    use sandgrid_warmpool::{WarmPool, WarmPoolConfig};

    use crate::manager::{CreateSessionRequest, LifecycleConfig};
    use crate::router::ResultRouter;

    fn make_node(id: &str) -> RuntimeNode {
        RuntimeNode {
            id: id.to_string(),
            engine: EngineKind::Stub,
            endpoint: "127.0.0.1:0".to_string(),
            health: NodeHealth::Healthy,
            total_cpu: 16.0,
            total_memory_mb: 32768,
            allocated_cpu: 0.0,
            allocated_memory_mb: 0,
            session_count: 0,
            max_sessions: 10,
            cached_templates: BTreeSet::new(),
            last_heartbeat: 1000,
        }
    }

    fn limit() -> ResourceLimit {
        ResourceLimit::new(1.0, 512, 1024).unwrap()
    }

    fn fast_executor() -> ExecutorClient {
        ExecutorClient::new(ExecutorClientConfig {
            agent_port: 1,
            request_timeout: std::time::Duration::from_millis(300),
            retry: RetryPolicy {
                max_retries: 0,
                base_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(2),
                jitter: 0.0,
            },
        })
    }

    async fn setup() -> (StateStore, Scheduler, SessionManager, Reaper) {
        let state = StateStore::open_in_memory().unwrap();
        let scheduler = Scheduler::new(state.clone());
        let runtime = StubRuntime::new();
        let warm_pool = WarmPool::new(
            WarmPoolConfig::default(),
            Arc::new(runtime.clone()),
            scheduler.clone(),
        );
        let router = ResultRouter::spawn(state.clone());
        let manager = SessionManager::new(
            state.clone(),
            scheduler.clone(),
            warm_pool,
            Arc::new(runtime),
            fast_executor(),
            router,
            LifecycleConfig::default(),
        );
        let reaper = Reaper::new(state.clone(), manager.clone(), fast_executor());
        (state, scheduler, manager, reaper)
    }

    fn stale_execution(id: &str, session_id: &str, last_heartbeat_at: u64) -> Execution {
        Execution {
            id: id.to_string(),
            session_id: session_id.to_string(),
            code: "def handler(event): return event".to_string(),
            language: "python".to_string(),
            event: serde_json::json!({}),
            timeout_secs: 30,
            status: ExecutionStatus::Running,
            exit_code: None,
            error: None,
            stdout: String::new(),
            stderr: String::new(),
            return_value: None,
            metrics: None,
            retry_count: 0,
            artifacts: Vec::new(),
            created_at: last_heartbeat_at,
            started_at: Some(last_heartbeat_at),
            completed_at: None,
            last_heartbeat_at,
        }
    }

    #[tokio::test]
    async fn stale_execution_is_forced_to_timeout() {
        let (state, _, _, reaper) = setup().await;
        let stale_at = epoch_secs() - 3600;
        state.put_execution(&stale_execution("exec-1", "sess-1", stale_at)).unwrap();

        reaper.sweep_once().await;

        let exec = state.get_execution("exec-1").unwrap().unwrap();
        assert_eq!(exec.status, ExecutionStatus::Timeout);
        assert!(exec.error.as_deref().unwrap_or("").contains("timed out"));
    }

    #[tokio::test]
    async fn fresh_execution_is_left_alone() {
        let (state, _, _, reaper) = setup().await;
        state
            .put_execution(&stale_execution("exec-1", "sess-1", epoch_secs()))
            .unwrap();

        reaper.sweep_once().await;

        let exec = state.get_execution("exec-1").unwrap().unwrap();
        assert_eq!(exec.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn terminal_execution_is_not_touched() {
        let (state, _, _, reaper) = setup().await;
        let mut exec = stale_execution("exec-1", "sess-1", epoch_secs() - 3600);
        exec.status = ExecutionStatus::Completed;
        exec.exit_code = Some(0);
        state.put_execution(&exec).unwrap();

        reaper.sweep_once().await;

        let after = state.get_execution("exec-1").unwrap().unwrap();
        assert_eq!(after.status, ExecutionStatus::Completed);
        assert_eq!(after, exec);
    }

    #[tokio::test]
    async fn silent_session_is_expired_and_resources_return() {
        let (state, scheduler, manager, reaper) = setup().await;
        scheduler.register_node(make_node("n1")).await.unwrap();

        let session = manager
            .create_session(CreateSessionRequest {
                template_id: "python-3.12".to_string(),
                resources: limit(),
                timeout_secs: Some(60),
                env: HashMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(scheduler.get_node("n1").await.unwrap().session_count, 1);

        // Rewind the heartbeat past the session timeout.
        let mut stored = state.get_session(&session.id).unwrap().unwrap();
        stored.last_heartbeat_at = epoch_secs() - 120;
        state.put_session(&stored).unwrap();

        reaper.sweep_once().await;

        let after = state.get_session(&session.id).unwrap().unwrap();
        assert_eq!(after.status, SessionStatus::Expired);
        let node = scheduler.get_node("n1").await.unwrap();
        assert_eq!(node.session_count, 0);
        assert_eq!(node.allocated_cpu, 0.0);
    }

    #[tokio::test]
    async fn active_session_survives_the_sweep() {
        let (state, scheduler, manager, reaper) = setup().await;
        scheduler.register_node(make_node("n1")).await.unwrap();

        let session = manager
            .create_session(CreateSessionRequest {
                template_id: "python-3.12".to_string(),
                resources: limit(),
                timeout_secs: Some(60),
                env: HashMap::new(),
            })
            .await
            .unwrap();

        reaper.sweep_once().await;

        let after = state.get_session(&session.id).unwrap().unwrap();
        assert_eq!(after.status, SessionStatus::Running);
    }
}
