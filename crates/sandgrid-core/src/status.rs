//! Session and execution lifecycle state machines.
//!
//! Transition validity is a pure function of (current, target). Invalid
//! requests fail with [`DomainError::InvalidStatus`] and leave state
//! unchanged. Terminal states admit no outgoing transitions.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::types::{Execution, Session};

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Creating,
    Running,
    Completed,
    Failed,
    Expired,
    Terminating,
    Terminated,
}

impl SessionStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Expired | Self::Terminated
        )
    }

    /// Whether `self -> target` is a legal transition.
    pub fn can_transition_to(self, target: Self) -> bool {
        use SessionStatus::*;
        matches!(
            (self, target),
            (Creating, Running)
                | (Creating, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Expired)
                | (Running, Terminating)
                | (Terminating, Terminated)
        )
    }

    /// Wire name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
        }
    }
}

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl ExecutionStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }

    /// Whether `self -> target` is a legal transition.
    ///
    /// `Pending -> Failed` covers dispatch failure before the agent
    /// accepted the work; `Pending -> Timeout` covers an execution that
    /// was never accepted and aged out under the reaper.
    pub fn can_transition_to(self, target: Self) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, target),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Timeout)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Timeout)
        )
    }

    /// Wire name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

/// Validate a session transition without applying it.
pub fn validate_session_transition(
    current: SessionStatus,
    target: SessionStatus,
) -> DomainResult<()> {
    if current.can_transition_to(target) {
        Ok(())
    } else {
        Err(DomainError::InvalidStatus {
            from: current.as_str().to_string(),
            to: target.as_str().to_string(),
        })
    }
}

/// Validate an execution transition without applying it.
pub fn validate_execution_transition(
    current: ExecutionStatus,
    target: ExecutionStatus,
) -> DomainResult<()> {
    if current.can_transition_to(target) {
        Ok(())
    } else {
        Err(DomainError::InvalidStatus {
            from: current.as_str().to_string(),
            to: target.as_str().to_string(),
        })
    }
}

impl Session {
    /// Apply a checked status transition. On error the session is untouched.
    pub fn transition_to(&mut self, target: SessionStatus) -> DomainResult<()> {
        validate_session_transition(self.status, target)?;
        self.status = target;
        Ok(())
    }
}

impl Execution {
    /// Apply a checked status transition. On error the execution is untouched.
    pub fn transition_to(&mut self, target: ExecutionStatus) -> DomainResult<()> {
        validate_execution_transition(self.status, target)?;
        self.status = target;
        Ok(())
    }
}
