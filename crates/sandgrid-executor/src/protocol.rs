//! Wire contract with the in-container executor agent.
//!
//! The agent exposes `POST /execute` and `POST /executions/{id}/kill`,
//! and reports completion asynchronously by calling the control plane's
//! `POST /internal/executions/{execution_id}/result` with a
//! [`ResultReport`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use sandgrid_core::{ArtifactRef, ExecutionMetrics, ExecutionStatus};

/// Body of `POST /execute` sent to the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecuteRequest {
    pub execution_id: String,
    pub session_id: String,
    pub code: String,
    pub language: String,
    pub event: serde_json::Value,
    /// Declared handler timeout in seconds. The agent enforces it
    /// in-container; the control plane's reaper is the backstop.
    pub timeout: u64,
    pub env_vars: HashMap<String, String>,
}

/// Acknowledgement returned by the agent for an accepted execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecuteAck {
    pub execution_id: String,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Completion report delivered by the agent once the handler finishes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultReport {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub return_value: Option<serde_json::Value>,
    #[serde(default)]
    pub metrics: Option<ExecutionMetrics>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_request_round_trips() {
        let req = ExecuteRequest {
            execution_id: "exec-1".to_string(),
            session_id: "sess-1".to_string(),
            code: "def handler(event): return 1".to_string(),
            language: "python".to_string(),
            event: serde_json::json!({"n": 3}),
            timeout: 30,
            env_vars: HashMap::from([("KEY".to_string(), "value".to_string())]),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: ExecuteRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn result_report_accepts_sparse_bodies() {
        // Agents report only what they have; everything but status is optional.
        let report: ResultReport =
            serde_json::from_str(r#"{"status": "failed", "error": "oom"}"#).unwrap();
        assert_eq!(report.status, ExecutionStatus::Failed);
        assert_eq!(report.error.as_deref(), Some("oom"));
        assert!(report.exit_code.is_none());
        assert!(report.artifacts.is_empty());
    }

    #[test]
    fn result_report_carries_artifacts() {
        let json = r#"{
            "status": "completed",
            "exit_code": 0,
            "return_value": {"ok": true},
            "artifacts": [{
                "path": "/out/plot.png",
                "size_bytes": 1024,
                "mime_type": "image/png",
                "checksum": "ab12"
            }]
        }"#;
        let report: ResultReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(report.artifacts[0].path, "/out/plot.png");
    }
}
