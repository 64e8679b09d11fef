//! Session manager — the orchestration surface behind the API.
//!
//! Session creation prefers a warm-pool adoption over a cold create;
//! either way the scheduler accounts the capacity and the session walks
//! CREATING → RUNNING (or CREATING → FAILED on a provisioning fault).
//! Execution submission persists a PENDING record and dispatches to the
//! agent from a background task so the caller never waits on agent
//! retries.
//!
//! Per-session transitions (terminate vs. expire vs. creation) are
//! serialized by a per-entity lock map; execution transitions go
//! through the [`ResultRouter`] mailbox.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use sandgrid_core::{
    DomainError, Execution, ExecutionStatus, ResourceLimit, RuntimeNode, Session, SessionId,
    SessionStatus, TemplateId, epoch_secs,
};
use sandgrid_executor::{ExecuteRequest, ExecutorClient, NodeFailureTracker, ResultReport};
use sandgrid_runtime::{ContainerRuntime, RuntimeError};
use sandgrid_scheduler::Scheduler;
use sandgrid_state::StateStore;
use sandgrid_warmpool::WarmPool;

use crate::auth::{callback_token, new_id};
use crate::error::{LifecycleError, LifecycleResult};
use crate::router::{AppliedOutcome, ResultRouter};

/// Env var holding the agent's result callback URL.
pub const CALLBACK_URL_VAR: &str = "SANDGRID_CALLBACK_URL";
/// Env var holding the agent's result callback bearer token.
pub const CALLBACK_TOKEN_VAR: &str = "SANDGRID_CALLBACK_TOKEN";

/// Lifecycle configuration.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Allowed template ids; an empty set admits any template.
    pub templates: BTreeSet<TemplateId>,
    pub default_session_timeout_secs: u64,
    pub default_execution_timeout_secs: u64,
    /// Upper bound on a declared execution timeout.
    pub max_execution_timeout_secs: u64,
    /// Base URL agents call back to, e.g. `http://10.0.0.1:8443`.
    pub callback_base_url: String,
    pub callback_secret: String,
    /// Consecutive dispatch failures before a node is marked unhealthy.
    pub node_failure_threshold: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            templates: BTreeSet::new(),
            default_session_timeout_secs: 300,
            default_execution_timeout_secs: 30,
            max_execution_timeout_secs: 900,
            callback_base_url: "http://127.0.0.1:8443".to_string(),
            callback_secret: "dev-secret".to_string(),
            node_failure_threshold: 5,
        }
    }
}

/// Parameters for creating a session.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub template_id: TemplateId,
    pub resources: ResourceLimit,
    pub timeout_secs: Option<u64>,
    pub env: HashMap<String, String>,
}

/// Parameters for submitting an execution.
#[derive(Debug, Clone)]
pub struct SubmitExecutionRequest {
    pub code: String,
    pub language: String,
    pub event: serde_json::Value,
    pub timeout_secs: Option<u64>,
}

/// Orchestrates session and execution lifecycles.
#[derive(Clone)]
pub struct SessionManager {
    state: StateStore,
    scheduler: Scheduler,
    warm_pool: WarmPool,
    runtime: Arc<dyn ContainerRuntime>,
    executor: ExecutorClient,
    failures: Arc<NodeFailureTracker>,
    router: ResultRouter,
    locks: Arc<Mutex<HashMap<SessionId, Arc<Mutex<()>>>>>,
    config: Arc<LifecycleConfig>,
}

impl SessionManager {
    pub fn new(
        state: StateStore,
        scheduler: Scheduler,
        warm_pool: WarmPool,
        runtime: Arc<dyn ContainerRuntime>,
        executor: ExecutorClient,
        router: ResultRouter,
        config: LifecycleConfig,
    ) -> Self {
        let failures = Arc::new(NodeFailureTracker::new(config.node_failure_threshold));
        Self {
            state,
            scheduler,
            warm_pool,
            runtime,
            executor,
            failures,
            router,
            locks: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn router(&self) -> &ResultRouter {
        &self.router
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Create a session, adopting a warm sandbox when one is available.
    pub async fn create_session(&self, req: CreateSessionRequest) -> LifecycleResult<Session> {
        if !self.config.templates.is_empty() && !self.config.templates.contains(&req.template_id)
        {
            return Err(DomainError::TemplateNotFound(req.template_id).into());
        }

        let timeout_secs = req
            .timeout_secs
            .unwrap_or(self.config.default_session_timeout_secs);
        if timeout_secs == 0 {
            return Err(DomainError::Validation("session timeout must be positive".to_string()).into());
        }

        // Warm fast path: adopt a pre-provisioned sandbox if its node
        // still has room for this request.
        if let Some(entry) = self.warm_pool.acquire(&req.template_id).await {
            match self.scheduler.reserve_on(&entry.node_id, &req.resources).await {
                Ok(_) => {
                    let now = epoch_secs();
                    let mut session = Session {
                        id: new_id("sess"),
                        template_id: req.template_id,
                        node_id: entry.node_id,
                        container_id: entry.container_id,
                        container_address: entry.container_address,
                        resources: req.resources,
                        status: SessionStatus::Creating,
                        timeout_secs,
                        env: req.env,
                        created_at: now,
                        last_heartbeat_at: now,
                    };
                    self.state.put_session(&session)?;

                    // The container is already up; creation is just adoption.
                    session
                        .transition_to(SessionStatus::Running)
                        .map_err(LifecycleError::Domain)?;
                    self.state.put_session(&session)?;
                    info!(
                        session_id = %session.id,
                        node_id = %session.node_id,
                        template_id = %session.template_id,
                        warm = true,
                        "session created"
                    );
                    return Ok(session);
                }
                Err(e) => {
                    debug!(
                        node_id = %entry.node_id,
                        error = %e,
                        "warm entry node cannot fit request, falling back to cold path"
                    );
                    self.warm_pool.release_to_pool(entry).await;
                }
            }
        }

        self.create_session_cold(req, timeout_secs).await
    }

    async fn create_session_cold(
        &self,
        req: CreateSessionRequest,
        timeout_secs: u64,
    ) -> LifecycleResult<Session> {
        let node = self.scheduler.schedule(&req.template_id, &req.resources).await?;

        let now = epoch_secs();
        let mut session = Session {
            id: new_id("sess"),
            template_id: req.template_id.clone(),
            node_id: node.id.clone(),
            container_id: String::new(),
            container_address: String::new(),
            resources: req.resources.clone(),
            status: SessionStatus::Creating,
            timeout_secs,
            env: req.env,
            created_at: now,
            last_heartbeat_at: now,
        };
        self.state.put_session(&session)?;

        match self.provision(&node, &req.template_id, &req.resources, &mut session).await {
            Ok(()) => {
                session
                    .transition_to(SessionStatus::Running)
                    .map_err(LifecycleError::Domain)?;
                session.last_heartbeat_at = epoch_secs();
                self.state.put_session(&session)?;
                info!(
                    session_id = %session.id,
                    node_id = %session.node_id,
                    template_id = %session.template_id,
                    warm = false,
                    "session created"
                );
                Ok(session)
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "session provisioning failed");
                if let Err(te) = session.transition_to(SessionStatus::Failed) {
                    warn!(session_id = %session.id, error = %te, "failed-session transition rejected");
                }
                self.state.put_session(&session)?;
                if !session.container_id.is_empty() {
                    let _ = self
                        .runtime
                        .destroy_container(&node, &session.container_id)
                        .await;
                }
                if let Err(re) = self.scheduler.release(&node.id, &session.resources).await {
                    warn!(node_id = %node.id, error = %re, "failed to release reservation");
                }
                Err(e)
            }
        }
    }

    /// Cold-create and start a container, then wait for its agent.
    async fn provision(
        &self,
        node: &RuntimeNode,
        template_id: &TemplateId,
        resources: &ResourceLimit,
        session: &mut Session,
    ) -> LifecycleResult<()> {
        let handle = self
            .runtime
            .create_container(node, template_id, resources)
            .await?;
        session.container_id = handle.container_id.clone();
        session.container_address = handle.address;

        self.runtime.start_container(node, &handle.container_id).await?;

        let ready = self
            .runtime
            .exec_health_check(node, &handle.container_id)
            .await?;
        if !ready {
            return Err(RuntimeError(format!(
                "agent in container {} never became ready",
                handle.container_id
            ))
            .into());
        }

        if let Err(e) = self.scheduler.add_cached_template(&node.id, template_id).await {
            warn!(node_id = %node.id, error = %e, "failed to record cached template");
        }
        Ok(())
    }

    /// Fetch a session by id.
    pub fn get_session(&self, session_id: &str) -> LifecycleResult<Session> {
        self.state
            .get_session(session_id)?
            .ok_or_else(|| DomainError::NotFound(format!("session {session_id}")).into())
    }

    /// List all sessions.
    pub fn list_sessions(&self) -> LifecycleResult<Vec<Session>> {
        Ok(self.state.list_sessions()?)
    }

    /// Terminate a running session: RUNNING → TERMINATING → TERMINATED,
    /// tearing down the container and returning its resources.
    pub async fn terminate_session(&self, session_id: &str) -> LifecycleResult<Session> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.get_session(session_id)?;
        session
            .transition_to(SessionStatus::Terminating)
            .map_err(LifecycleError::Domain)?;
        self.state.put_session(&session)?;

        self.teardown_container(&session).await;

        session
            .transition_to(SessionStatus::Terminated)
            .map_err(LifecycleError::Domain)?;
        self.state.put_session(&session)?;

        if let Err(e) = self.scheduler.release(&session.node_id, &session.resources).await {
            warn!(
                session_id = %session.id,
                node_id = %session.node_id,
                error = %e,
                "resource release failed"
            );
        }

        info!(session_id = %session.id, "session terminated");
        Ok(session)
    }

    /// Reaper path: expire a session whose heartbeat is older than its
    /// timeout. Returns `false` if the session is no longer running or
    /// was touched since the sweep read it.
    pub async fn expire_session(&self, session_id: &str, now: u64) -> LifecycleResult<bool> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.get_session(session_id)?;
        if session.status != SessionStatus::Running {
            return Ok(false);
        }
        if now.saturating_sub(session.last_heartbeat_at) <= session.timeout_secs {
            // Heartbeat arrived between the sweep read and the lock.
            return Ok(false);
        }

        session
            .transition_to(SessionStatus::Expired)
            .map_err(LifecycleError::Domain)?;
        self.state.put_session(&session)?;

        self.teardown_container(&session).await;

        if let Err(e) = self.scheduler.release(&session.node_id, &session.resources).await {
            warn!(
                session_id = %session.id,
                node_id = %session.node_id,
                error = %e,
                "resource release failed"
            );
        }

        warn!(
            session_id = %session.id,
            idle_secs = now.saturating_sub(session.last_heartbeat_at),
            "session expired"
        );
        Ok(true)
    }

    /// Record client/agent activity on a session.
    pub async fn record_session_heartbeat(&self, session_id: &str) -> LifecycleResult<()> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.get_session(session_id)?;
        match session.status {
            SessionStatus::Expired => {
                return Err(DomainError::SessionExpired(session_id.to_string()).into());
            }
            s if s.is_terminal() => {
                return Err(DomainError::Validation(format!(
                    "session {session_id} is {}",
                    s.as_str()
                ))
                .into());
            }
            _ => {}
        }
        session.last_heartbeat_at = epoch_secs();
        self.state.put_session(&session)?;
        Ok(())
    }

    // ── Executions ─────────────────────────────────────────────────

    /// Create a PENDING execution and dispatch it in the background.
    pub async fn submit_execution(
        &self,
        session_id: &str,
        req: SubmitExecutionRequest,
    ) -> LifecycleResult<Execution> {
        let mut session = self.get_session(session_id)?;
        match session.status {
            SessionStatus::Running => {}
            SessionStatus::Expired => {
                return Err(DomainError::SessionExpired(session_id.to_string()).into());
            }
            other => {
                return Err(DomainError::Validation(format!(
                    "session {session_id} is {}, not running",
                    other.as_str()
                ))
                .into());
            }
        }

        if req.code.trim().is_empty() {
            return Err(DomainError::Validation("code must not be empty".to_string()).into());
        }
        if req.language.trim().is_empty() {
            return Err(DomainError::Validation("language must not be empty".to_string()).into());
        }
        let timeout_secs = req
            .timeout_secs
            .unwrap_or(self.config.default_execution_timeout_secs);
        if timeout_secs == 0 || timeout_secs > self.config.max_execution_timeout_secs {
            return Err(DomainError::Validation(format!(
                "execution timeout must be in 1..={}s",
                self.config.max_execution_timeout_secs
            ))
            .into());
        }

        let now = epoch_secs();
        let execution = Execution {
            id: new_id("exec"),
            session_id: session.id.clone(),
            code: req.code,
            language: req.language,
            event: req.event,
            timeout_secs,
            status: ExecutionStatus::Pending,
            exit_code: None,
            error: None,
            stdout: String::new(),
            stderr: String::new(),
            return_value: None,
            metrics: None,
            retry_count: 0,
            artifacts: Vec::new(),
            created_at: now,
            started_at: None,
            completed_at: None,
            last_heartbeat_at: now,
        };
        self.state.put_execution(&execution)?;

        // Submitting work counts as session activity.
        session.last_heartbeat_at = now;
        self.state.put_session(&session)?;

        let manager = self.clone();
        let dispatch_exec = execution.clone();
        tokio::spawn(async move {
            manager.dispatch(&session, &dispatch_exec).await;
        });

        debug!(execution_id = %execution.id, %session_id, "execution submitted");
        Ok(execution)
    }

    /// Dispatch one execution to its session's agent; outcomes flow
    /// back through the result router.
    async fn dispatch(&self, session: &Session, execution: &Execution) {
        let request = ExecuteRequest {
            execution_id: execution.id.clone(),
            session_id: session.id.clone(),
            code: execution.code.clone(),
            language: execution.language.clone(),
            event: execution.event.clone(),
            timeout: execution.timeout_secs,
            env_vars: self.agent_env(session, &execution.id),
        };

        match self.executor.execute(&session.container_address, &request).await {
            Ok((ack, retries)) => {
                debug!(
                    execution_id = %execution.id,
                    ack_status = %ack.status,
                    retries,
                    "agent accepted execution"
                );
                self.failures.record_success(&session.node_id).await;
                if let Err(e) = self.router.agent_accepted(&execution.id, retries).await {
                    warn!(execution_id = %execution.id, error = %e, "failed to record acceptance");
                }
            }
            Err(e) => {
                let retries = if e.is_retryable() {
                    self.executor.config().retry.max_retries
                } else {
                    0
                };
                if self.failures.record_failure(&session.node_id).await {
                    if let Err(me) = self.scheduler.mark_node_unhealthy(&session.node_id).await {
                        warn!(node_id = %session.node_id, error = %me, "failed to mark node unhealthy");
                    }
                }
                if let Err(re) = self
                    .router
                    .dispatch_failed(&execution.id, e.to_string(), retries)
                    .await
                {
                    warn!(execution_id = %execution.id, error = %re, "failed to record dispatch failure");
                }
            }
        }
    }

    /// Env vars injected into the agent request: the session's own env
    /// plus the result callback coordinates.
    fn agent_env(&self, session: &Session, execution_id: &str) -> HashMap<String, String> {
        let mut env = session.env.clone();
        env.insert(
            CALLBACK_URL_VAR.to_string(),
            format!(
                "{}/internal/executions/{execution_id}/result",
                self.config.callback_base_url.trim_end_matches('/')
            ),
        );
        env.insert(
            CALLBACK_TOKEN_VAR.to_string(),
            callback_token(&self.config.callback_secret, execution_id),
        );
        env
    }

    /// Fetch an execution by id.
    pub fn get_execution(&self, execution_id: &str) -> LifecycleResult<Execution> {
        self.state
            .get_execution(execution_id)?
            .ok_or_else(|| DomainError::NotFound(format!("execution {execution_id}")).into())
    }

    /// List a session's executions.
    pub fn list_executions(&self, session_id: &str) -> LifecycleResult<Vec<Execution>> {
        Ok(self.state.list_executions_for_session(session_id)?)
    }

    /// Fetch a finished execution's result, mapping failure modes to
    /// their domain errors.
    pub fn execution_result(&self, execution_id: &str) -> LifecycleResult<Execution> {
        let exec = self.get_execution(execution_id)?;
        match exec.status {
            ExecutionStatus::Completed => Ok(exec),
            ExecutionStatus::Timeout => {
                Err(DomainError::ExecutionTimeout(execution_id.to_string()).into())
            }
            ExecutionStatus::Failed => Err(DomainError::ExecutionCrashed(
                exec.error.unwrap_or_else(|| "execution failed".to_string()),
            )
            .into()),
            ExecutionStatus::Pending | ExecutionStatus::Running => Err(DomainError::Validation(
                format!("execution {execution_id} has not completed"),
            )
            .into()),
        }
    }

    /// Apply an agent result callback (idempotent, see [`ResultRouter`]).
    pub async fn apply_result(
        &self,
        execution_id: &str,
        report: ResultReport,
    ) -> LifecycleResult<AppliedOutcome> {
        self.router.apply_result(execution_id, report).await
    }

    /// Record an agent keep-alive for an execution.
    pub async fn record_execution_heartbeat(&self, execution_id: &str) -> LifecycleResult<()> {
        self.router.record_heartbeat(execution_id).await
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn teardown_container(&self, session: &Session) {
        if session.container_id.is_empty() {
            return;
        }
        let Some(node) = self.scheduler.get_node(&session.node_id).await else {
            warn!(node_id = %session.node_id, "session's node is gone, skipping teardown");
            return;
        };
        if let Err(e) = self.runtime.stop_container(&node, &session.container_id).await {
            debug!(container_id = %session.container_id, error = %e, "container stop failed");
        }
        if let Err(e) = self
            .runtime
            .destroy_container(&node, &session.container_id)
            .await
        {
            warn!(container_id = %session.container_id, error = %e, "container destroy failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    use sandgrid_core::{EngineKind, NodeHealth};
    use sandgrid_executor::{ExecutorClientConfig, RetryPolicy};
    use sandgrid_runtime::StubRuntime;
    use sandgrid_warmpool::{WarmPoolConfig, WarmTarget};

    fn make_node(id: &str, max_sessions: u32) -> RuntimeNode {
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
            max_sessions,
            cached_templates: BTreeSet::new(),
            last_heartbeat: 1000,
        }
    }

    fn limit() -> ResourceLimit {
        ResourceLimit::new(1.0, 512, 1024).unwrap()
    }

    fn fast_executor() -> ExecutorClient {
        // Port 1 is closed; connect fails fast and retries are zero so
        // dispatch outcomes land quickly.
        ExecutorClient::new(ExecutorClientConfig {
            agent_port: 1,
            request_timeout: Duration::from_millis(300),
            retry: RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: 0.0,
            },
        })
    }

    struct Harness {
        state: StateStore,
        scheduler: Scheduler,
        warm_pool: WarmPool,
        runtime: StubRuntime,
        manager: SessionManager,
    }

    async fn setup(warm_per_node: u32) -> Harness {
        let state = StateStore::open_in_memory().unwrap();
        let scheduler = Scheduler::new(state.clone());
        let runtime = StubRuntime::new();
        let warm_pool = WarmPool::new(
            WarmPoolConfig {
                targets: vec![WarmTarget {
                    template_id: "python-3.12".to_string(),
                    per_node: warm_per_node,
                    resources: limit(),
                }],
                max_idle_secs: 600,
            },
            Arc::new(runtime.clone()),
            scheduler.clone(),
        );
        let router = ResultRouter::spawn(state.clone());
        let manager = SessionManager::new(
            state.clone(),
            scheduler.clone(),
            warm_pool.clone(),
            Arc::new(runtime.clone()),
            fast_executor(),
            router,
            LifecycleConfig {
                node_failure_threshold: 2,
                ..LifecycleConfig::default()
            },
        );
        Harness {
            state,
            scheduler,
            warm_pool,
            runtime,
            manager,
        }
    }

    fn create_request() -> CreateSessionRequest {
        CreateSessionRequest {
            template_id: "python-3.12".to_string(),
            resources: limit(),
            timeout_secs: Some(300),
            env: HashMap::new(),
        }
    }

    fn submit_request() -> SubmitExecutionRequest {
        SubmitExecutionRequest {
            code: "def handler(event): return event".to_string(),
            language: "python".to_string(),
            event: serde_json::json!({"n": 1}),
            timeout_secs: Some(30),
        }
    }

    /// Poll the store until the execution leaves PENDING (dispatch task
    /// outcome) or the deadline passes.
    async fn wait_for_dispatch(state: &StateStore, execution_id: &str) -> Execution {
        for _ in 0..100 {
            let exec = state.get_execution(execution_id).unwrap().unwrap();
            if exec.status != ExecutionStatus::Pending {
                return exec;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("execution {execution_id} never left PENDING");
    }

    #[tokio::test]
    async fn cold_create_reaches_running() {
        let h = setup(0).await;
        h.scheduler.register_node(make_node("n1", 10)).await.unwrap();

        let session = h.manager.create_session(create_request()).await.unwrap();
        assert_eq!(session.status, SessionStatus::Running);
        assert!(!session.container_id.is_empty());
        assert_eq!(h.runtime.create_count(), 1);

        let node = h.scheduler.get_node("n1").await.unwrap();
        assert_eq!(node.session_count, 1);
        assert!(node.has_template("python-3.12"));
    }

    #[tokio::test]
    async fn warm_hit_skips_cold_create() {
        let h = setup(1).await;
        h.scheduler.register_node(make_node("n1", 10)).await.unwrap();
        h.warm_pool.replenish_once().await;
        let creates_after_warmup = h.runtime.create_count();

        let session = h.manager.create_session(create_request()).await.unwrap();
        assert_eq!(session.status, SessionStatus::Running);
        // No additional cold create — the warm container was adopted.
        assert_eq!(h.runtime.create_count(), creates_after_warmup);

        let node = h.scheduler.get_node("n1").await.unwrap();
        assert_eq!(node.session_count, 1);
        assert_eq!(h.warm_pool.idle_count("python-3.12").await, 0);
    }

    #[tokio::test]
    async fn warm_entry_returns_to_pool_when_node_is_full() {
        let h = setup(1).await;
        h.scheduler.register_node(make_node("n1", 1)).await.unwrap();
        h.warm_pool.replenish_once().await;

        // Eat the only session slot so the warm entry's node can't fit.
        h.scheduler.reserve_on("n1", &limit()).await.unwrap();

        let err = h.manager.create_session(create_request()).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Domain(DomainError::NodeUnavailable(_))
        ));
        // The entry survived for the next caller.
        assert_eq!(h.warm_pool.idle_count("python-3.12").await, 1);
    }

    #[tokio::test]
    async fn no_nodes_means_node_unavailable() {
        let h = setup(0).await;
        let err = h.manager.create_session(create_request()).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Domain(DomainError::NodeUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn unknown_template_is_rejected() {
        let h = setup(0).await;
        let mut manager = h.manager.clone();
        manager.config = Arc::new(LifecycleConfig {
            templates: BTreeSet::from(["python-3.12".to_string()]),
            ..LifecycleConfig::default()
        });

        let mut req = create_request();
        req.template_id = "golang-1.23".to_string();
        let err = manager.create_session(req).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Domain(DomainError::TemplateNotFound(_))
        ));
    }

    #[tokio::test]
    async fn provisioning_failure_marks_session_failed_and_releases() {
        let h = setup(0).await;
        h.scheduler.register_node(make_node("n1", 10)).await.unwrap();
        h.runtime.set_fail_creates(true);

        let err = h.manager.create_session(create_request()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Runtime(_)));

        let sessions = h.state.list_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Failed);

        let node = h.scheduler.get_node("n1").await.unwrap();
        assert_eq!(node.session_count, 0);
        assert_eq!(node.allocated_cpu, 0.0);
    }

    #[tokio::test]
    async fn terminate_walks_the_machine_and_releases() {
        let h = setup(0).await;
        h.scheduler.register_node(make_node("n1", 10)).await.unwrap();

        let session = h.manager.create_session(create_request()).await.unwrap();
        let terminated = h.manager.terminate_session(&session.id).await.unwrap();
        assert_eq!(terminated.status, SessionStatus::Terminated);

        let node = h.scheduler.get_node("n1").await.unwrap();
        assert_eq!(node.session_count, 0);
        assert_eq!(h.runtime.live_count().await, 0);

        // Terminating again violates the state machine.
        let err = h.manager.terminate_session(&session.id).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Domain(DomainError::InvalidStatus { .. })
        ));
    }

    #[tokio::test]
    async fn expire_releases_resources_once() {
        let h = setup(0).await;
        h.scheduler.register_node(make_node("n1", 10)).await.unwrap();

        let session = h.manager.create_session(create_request()).await.unwrap();

        let far_future = epoch_secs() + session.timeout_secs + 10;
        assert!(h.manager.expire_session(&session.id, far_future).await.unwrap());
        // Second sweep observes the terminal state and declines.
        assert!(!h.manager.expire_session(&session.id, far_future).await.unwrap());

        let stored = h.state.get_session(&session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Expired);
        let node = h.scheduler.get_node("n1").await.unwrap();
        assert_eq!(node.session_count, 0);
    }

    #[tokio::test]
    async fn expire_declines_fresh_sessions() {
        let h = setup(0).await;
        h.scheduler.register_node(make_node("n1", 10)).await.unwrap();

        let session = h.manager.create_session(create_request()).await.unwrap();
        assert!(!h.manager.expire_session(&session.id, epoch_secs()).await.unwrap());

        let stored = h.state.get_session(&session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn submit_creates_pending_then_dispatch_fails_against_dead_agent() {
        let h = setup(0).await;
        h.scheduler.register_node(make_node("n1", 10)).await.unwrap();
        let session = h.manager.create_session(create_request()).await.unwrap();

        let exec = h.manager.submit_execution(&session.id, submit_request()).await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::Pending);

        // No agent listens in the stub world; dispatch exhausts its
        // (zero) retries and the router marks the execution failed.
        let settled = wait_for_dispatch(&h.state, &exec.id).await;
        assert_eq!(settled.status, ExecutionStatus::Failed);
        assert!(settled.error.is_some());
    }

    #[tokio::test]
    async fn repeated_dispatch_failures_trip_the_node_breaker() {
        let h = setup(0).await;
        h.scheduler.register_node(make_node("n1", 10)).await.unwrap();
        let session = h.manager.create_session(create_request()).await.unwrap();

        // Threshold is 2 in the harness config.
        let e1 = h.manager.submit_execution(&session.id, submit_request()).await.unwrap();
        wait_for_dispatch(&h.state, &e1.id).await;
        let e2 = h.manager.submit_execution(&session.id, submit_request()).await.unwrap();
        wait_for_dispatch(&h.state, &e2.id).await;

        for _ in 0..100 {
            if h.scheduler.get_node("n1").await.unwrap().health == NodeHealth::Unhealthy {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("node never marked unhealthy after repeated dispatch failures");
    }

    #[tokio::test]
    async fn submit_on_missing_or_dead_session_is_rejected() {
        let h = setup(0).await;
        h.scheduler.register_node(make_node("n1", 10)).await.unwrap();

        let err = h.manager.submit_execution("sess-missing", submit_request()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Domain(DomainError::NotFound(_))));

        let session = h.manager.create_session(create_request()).await.unwrap();
        let far_future = epoch_secs() + 1000;
        h.manager.expire_session(&session.id, far_future).await.unwrap();

        let err = h.manager.submit_execution(&session.id, submit_request()).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Domain(DomainError::SessionExpired(_))
        ));
    }

    #[tokio::test]
    async fn submit_validates_inputs() {
        let h = setup(0).await;
        h.scheduler.register_node(make_node("n1", 10)).await.unwrap();
        let session = h.manager.create_session(create_request()).await.unwrap();

        let mut empty_code = submit_request();
        empty_code.code = "  ".to_string();
        assert!(matches!(
            h.manager.submit_execution(&session.id, empty_code).await.unwrap_err(),
            LifecycleError::Domain(DomainError::Validation(_))
        ));

        let mut huge_timeout = submit_request();
        huge_timeout.timeout_secs = Some(100_000);
        assert!(matches!(
            h.manager.submit_execution(&session.id, huge_timeout).await.unwrap_err(),
            LifecycleError::Domain(DomainError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn execution_result_maps_failure_modes() {
        let h = setup(0).await;
        h.scheduler.register_node(make_node("n1", 10)).await.unwrap();
        let session = h.manager.create_session(create_request()).await.unwrap();

        let exec = h.manager.submit_execution(&session.id, submit_request()).await.unwrap();

        // Not finished yet (or already failed by the dead-agent dispatch;
        // both map to an error here).
        assert!(h.manager.execution_result(&exec.id).is_err());

        let report = ResultReport {
            status: ExecutionStatus::Completed,
            exit_code: Some(0),
            stdout: None,
            stderr: None,
            return_value: Some(serde_json::json!(42)),
            metrics: None,
            error: None,
            artifacts: Vec::new(),
        };
        // Apply may be a duplicate if the dispatch failure won the race;
        // only assert the mapping when completion stuck.
        if h.manager.apply_result(&exec.id, report).await.unwrap() == AppliedOutcome::Applied {
            let result = h.manager.execution_result(&exec.id).unwrap();
            assert_eq!(result.return_value, Some(serde_json::json!(42)));
        }
    }

    #[tokio::test]
    async fn agent_env_carries_callback_coordinates() {
        let h = setup(0).await;
        h.scheduler.register_node(make_node("n1", 10)).await.unwrap();
        let mut req = create_request();
        req.env.insert("USER_VAR".to_string(), "1".to_string());
        let session = h.manager.create_session(req).await.unwrap();

        let env = h.manager.agent_env(&session, "exec-42");
        assert_eq!(env.get("USER_VAR").map(String::as_str), Some("1"));
        assert!(
            env.get(CALLBACK_URL_VAR)
                .is_some_and(|u| u.ends_with("/internal/executions/exec-42/result"))
        );
        assert_eq!(
            env.get(CALLBACK_TOKEN_VAR).map(String::as_str),
            Some(callback_token("dev-secret", "exec-42").as_str())
        );
    }

    #[tokio::test]
    async fn session_heartbeat_defers_expiry() {
        let h = setup(0).await;
        h.scheduler.register_node(make_node("n1", 10)).await.unwrap();
        let session = h.manager.create_session(create_request()).await.unwrap();

        h.manager.record_session_heartbeat(&session.id).await.unwrap();
        let stored = h.state.get_session(&session.id).unwrap().unwrap();
        assert!(stored.last_heartbeat_at >= session.last_heartbeat_at);

        let far_future = epoch_secs() + 1000;
        h.manager.expire_session(&session.id, far_future).await.unwrap();
        let err = h.manager.record_session_heartbeat(&session.id).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Domain(DomainError::SessionExpired(_))
        ));
    }
}
