//! Result applier — the single writer for execution status.
//!
//! Every execution transition (agent result callbacks, dispatch
//! outcomes, reaper timeouts, agent heartbeats) is delivered as a
//! message into one mailbox and applied by one task. Whichever
//! transition arrives first wins; anything that finds the execution
//! already terminal is the idempotent-duplicate case and is logged,
//! never re-applied.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use sandgrid_core::{DomainError, ExecutionStatus, epoch_secs};
use sandgrid_executor::ResultReport;
use sandgrid_state::StateStore;

use crate::error::{LifecycleError, LifecycleResult};

/// What happened to a delivered result callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedOutcome {
    /// The report moved the execution to its terminal state.
    Applied,
    /// The execution was already terminal; the report was dropped.
    Duplicate,
}

enum Msg {
    Report {
        execution_id: String,
        report: Box<ResultReport>,
        reply: oneshot::Sender<LifecycleResult<AppliedOutcome>>,
    },
    AgentAccepted {
        execution_id: String,
        retries: u32,
    },
    DispatchFailed {
        execution_id: String,
        error: String,
        retries: u32,
    },
    ForceTimeout {
        execution_id: String,
        reply: oneshot::Sender<LifecycleResult<bool>>,
    },
    Heartbeat {
        execution_id: String,
        reply: oneshot::Sender<LifecycleResult<()>>,
    },
}

/// Handle to the applier task. Cheap to clone; the task stops when the
/// last handle is dropped.
#[derive(Clone)]
pub struct ResultRouter {
    tx: mpsc::Sender<Msg>,
}

impl ResultRouter {
    /// Spawn the applier task over a state store.
    pub fn spawn(state: StateStore) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(apply_loop(state, rx));
        Self { tx }
    }

    /// Deliver an agent result callback and wait for the verdict.
    pub async fn apply_result(
        &self,
        execution_id: &str,
        report: ResultReport,
    ) -> LifecycleResult<AppliedOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Msg::Report {
            execution_id: execution_id.to_string(),
            report: Box::new(report),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| LifecycleError::Internal("result applier dropped reply".to_string()))?
    }

    /// Record that the agent accepted a dispatched execution.
    pub async fn agent_accepted(&self, execution_id: &str, retries: u32) -> LifecycleResult<()> {
        self.send(Msg::AgentAccepted {
            execution_id: execution_id.to_string(),
            retries,
        })
        .await
    }

    /// Record that dispatch exhausted its retries.
    pub async fn dispatch_failed(
        &self,
        execution_id: &str,
        error: String,
        retries: u32,
    ) -> LifecycleResult<()> {
        self.send(Msg::DispatchFailed {
            execution_id: execution_id.to_string(),
            error,
            retries,
        })
        .await
    }

    /// Force a reaper-driven timeout. Returns `true` if the execution
    /// transitioned (the caller should then kill the agent-side work),
    /// `false` if a result got there first.
    pub async fn force_timeout(&self, execution_id: &str) -> LifecycleResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Msg::ForceTimeout {
            execution_id: execution_id.to_string(),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| LifecycleError::Internal("result applier dropped reply".to_string()))?
    }

    /// Record an agent keep-alive for a running execution.
    pub async fn record_heartbeat(&self, execution_id: &str) -> LifecycleResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Msg::Heartbeat {
            execution_id: execution_id.to_string(),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| LifecycleError::Internal("result applier dropped reply".to_string()))?
    }

    async fn send(&self, msg: Msg) -> LifecycleResult<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| LifecycleError::Internal("result applier stopped".to_string()))
    }
}

async fn apply_loop(state: StateStore, mut rx: mpsc::Receiver<Msg>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            Msg::Report {
                execution_id,
                report,
                reply,
            } => {
                let _ = reply.send(apply_report(&state, &execution_id, &report));
            }
            Msg::AgentAccepted {
                execution_id,
                retries,
            } => {
                if let Err(e) = apply_agent_accepted(&state, &execution_id, retries) {
                    warn!(%execution_id, error = %e, "failed to record agent acceptance");
                }
            }
            Msg::DispatchFailed {
                execution_id,
                error,
                retries,
            } => {
                if let Err(e) = apply_dispatch_failed(&state, &execution_id, &error, retries) {
                    warn!(%execution_id, error = %e, "failed to record dispatch failure");
                }
            }
            Msg::ForceTimeout {
                execution_id,
                reply,
            } => {
                let _ = reply.send(apply_force_timeout(&state, &execution_id));
            }
            Msg::Heartbeat {
                execution_id,
                reply,
            } => {
                let _ = reply.send(apply_heartbeat(&state, &execution_id));
            }
        }
    }
    debug!("result applier stopped");
}

fn apply_report(
    state: &StateStore,
    execution_id: &str,
    report: &ResultReport,
) -> LifecycleResult<AppliedOutcome> {
    let mut exec = state
        .get_execution(execution_id)?
        .ok_or_else(|| DomainError::NotFound(format!("execution {execution_id}")))?;

    if exec.status.is_terminal() {
        // Agent-side retries can duplicate delivery; accept silently.
        debug!(
            %execution_id,
            status = exec.status.as_str(),
            "duplicate result callback ignored"
        );
        return Ok(AppliedOutcome::Duplicate);
    }

    if !report.status.is_terminal() {
        return Err(DomainError::Validation(format!(
            "result callback must carry a terminal status, got {}",
            report.status.as_str()
        ))
        .into());
    }

    let now = epoch_secs();

    // A result arriving for a still-pending execution implies the agent
    // accepted it; bridge through RUNNING so the machine stays honest.
    if exec.status == ExecutionStatus::Pending {
        exec.transition_to(ExecutionStatus::Running)
            .map_err(LifecycleError::Domain)?;
        exec.started_at = Some(now);
    }

    exec.transition_to(report.status)
        .map_err(LifecycleError::Domain)?;

    exec.exit_code = report.exit_code;
    exec.error = report.error.clone();
    if let Some(stdout) = &report.stdout {
        exec.stdout = stdout.clone();
    }
    if let Some(stderr) = &report.stderr {
        exec.stderr = stderr.clone();
    }
    exec.return_value = report.return_value.clone();
    if report.metrics.is_some() {
        exec.metrics = report.metrics.clone();
    }
    if !report.artifacts.is_empty() {
        exec.artifacts = report.artifacts.clone();
    }
    exec.completed_at = Some(now);
    exec.last_heartbeat_at = now;

    state.put_execution(&exec)?;
    info!(
        %execution_id,
        status = exec.status.as_str(),
        exit_code = ?exec.exit_code,
        "execution result applied"
    );
    Ok(AppliedOutcome::Applied)
}

fn apply_agent_accepted(
    state: &StateStore,
    execution_id: &str,
    retries: u32,
) -> LifecycleResult<()> {
    let Some(mut exec) = state.get_execution(execution_id)? else {
        warn!(%execution_id, "agent accepted unknown execution");
        return Ok(());
    };

    exec.retry_count = retries;
    if exec.status == ExecutionStatus::Pending {
        exec.transition_to(ExecutionStatus::Running)
            .map_err(LifecycleError::Domain)?;
        let now = epoch_secs();
        exec.started_at = Some(now);
        exec.last_heartbeat_at = now;
        debug!(%execution_id, retries, "execution running");
    } else {
        // A fast agent's result callback can overtake the ack.
        debug!(
            %execution_id,
            status = exec.status.as_str(),
            "acceptance after status already advanced"
        );
    }
    state.put_execution(&exec)?;
    Ok(())
}

fn apply_dispatch_failed(
    state: &StateStore,
    execution_id: &str,
    error: &str,
    retries: u32,
) -> LifecycleResult<()> {
    let Some(mut exec) = state.get_execution(execution_id)? else {
        warn!(%execution_id, "dispatch failure for unknown execution");
        return Ok(());
    };

    if exec.status.is_terminal() {
        debug!(%execution_id, "dispatch failure after terminal status, ignored");
        return Ok(());
    }

    exec.transition_to(ExecutionStatus::Failed)
        .map_err(LifecycleError::Domain)?;
    exec.error = Some(error.to_string());
    exec.retry_count = retries;
    exec.completed_at = Some(epoch_secs());
    state.put_execution(&exec)?;
    warn!(%execution_id, retries, %error, "execution failed to dispatch");
    Ok(())
}

fn apply_force_timeout(state: &StateStore, execution_id: &str) -> LifecycleResult<bool> {
    let mut exec = state
        .get_execution(execution_id)?
        .ok_or_else(|| DomainError::NotFound(format!("execution {execution_id}")))?;

    if exec.status.is_terminal() {
        // A result beat the reaper; nothing to reclaim.
        debug!(%execution_id, "timeout skipped, execution already terminal");
        return Ok(false);
    }

    exec.transition_to(ExecutionStatus::Timeout)
        .map_err(LifecycleError::Domain)?;
    exec.error = Some(format!(
        "execution timed out after {}s without a result",
        exec.timeout_secs
    ));
    exec.completed_at = Some(epoch_secs());
    state.put_execution(&exec)?;
    warn!(%execution_id, timeout_secs = exec.timeout_secs, "execution timed out");
    Ok(true)
}

fn apply_heartbeat(state: &StateStore, execution_id: &str) -> LifecycleResult<()> {
    let mut exec = state
        .get_execution(execution_id)?
        .ok_or_else(|| DomainError::NotFound(format!("execution {execution_id}")))?;

    if exec.status.is_terminal() {
        debug!(%execution_id, "heartbeat after terminal status, ignored");
        return Ok(());
    }

    exec.last_heartbeat_at = epoch_secs();
    state.put_execution(&exec)?;
    Ok(())
}
