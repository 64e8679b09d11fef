//! HTTP client for the in-container executor agent.
//!
//! Dispatches over a raw TCP + hyper h1 handshake per call. The request
//! timeout bounds connect + response and is independent of the
//! execution's own declared timeout — a slow handler never holds a
//! control-plane connection open.

use std::time::Duration;

use http_body_util::BodyExt;
use tracing::{debug, warn};

use crate::error::{ExecutorError, ExecutorResult};
use crate::protocol::{ExecuteAck, ExecuteRequest};
use crate::retry::{RetryPolicy, retry_with};

/// Executor client configuration.
#[derive(Debug, Clone)]
pub struct ExecutorClientConfig {
    /// Fixed port the executor agent listens on inside every container.
    pub agent_port: u16,
    /// Connect + response timeout per call.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ExecutorClientConfig {
    fn default() -> Self {
        Self {
            agent_port: 8194,
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// Client for dispatching executions to agents.
#[derive(Debug, Clone)]
pub struct ExecutorClient {
    config: ExecutorClientConfig,
}

impl ExecutorClient {
    pub fn new(config: ExecutorClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorClientConfig {
        &self.config
    }

    /// Agent socket address for a container's network identity.
    pub fn agent_addr(&self, container_address: &str) -> String {
        format!("{container_address}:{}", self.config.agent_port)
    }

    /// Dispatch an execution request, retrying transient failures per
    /// the configured policy. Returns the agent's acknowledgement and
    /// the number of retries consumed.
    pub async fn execute(
        &self,
        container_address: &str,
        request: &ExecuteRequest,
    ) -> ExecutorResult<(ExecuteAck, u32)> {
        let addr = self.agent_addr(container_address);
        let body = serde_json::to_vec(request)
            .map_err(|e| ExecutorError::Validation(format!("unserializable request: {e}")))?;

        let mut retries_used = 0;
        let ack = retry_with(&self.config.retry, |attempt| {
            retries_used = attempt;
            let addr = addr.clone();
            let body = body.clone();
            async move {
                let (status, resp) = self.post_json(&addr, "/execute", body).await?;
                parse_ack(status, &resp)
            }
        })
        .await?;

        debug!(
            execution_id = %request.execution_id,
            %addr,
            retries = retries_used,
            "execution dispatched"
        );
        Ok((ack, retries_used))
    }

    /// Best-effort kill of a running execution. Errors are reported but
    /// callers treat them as advisory — the reaper's state transition
    /// proceeds regardless.
    pub async fn kill(
        &self,
        container_address: &str,
        execution_id: &str,
    ) -> ExecutorResult<()> {
        let addr = self.agent_addr(container_address);
        let path = format!("/executions/{execution_id}/kill");
        let (status, body) = self.post_json(&addr, &path, Vec::new()).await?;

        if (200..300).contains(&status) {
            Ok(())
        } else {
            warn!(%execution_id, status, "kill request rejected by agent");
            Err(ExecutorError::Response {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            })
        }
    }

    /// One `POST` to the agent. Returns (status, body) or a classified
    /// transport error.
    async fn post_json(
        &self,
        addr: &str,
        path: &str,
        body: Vec<u8>,
    ) -> ExecutorResult<(u16, Vec<u8>)> {
        let timeout = self.config.request_timeout;
        let result = tokio::time::timeout(timeout, async {
            let stream = tokio::net::TcpStream::connect(addr)
                .await
                .map_err(|e| ExecutorError::Connection(format!("{addr}: {e}")))?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| ExecutorError::Connection(format!("{addr}: handshake: {e}")))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = http::Request::builder()
                .method("POST")
                .uri(format!("http://{addr}{path}"))
                .header("host", addr)
                .header("content-type", "application/json")
                .header("user-agent", "sandgrid-executor/0.1")
                .body(http_body_util::Full::new(bytes::Bytes::from(body)))
                .map_err(|e| ExecutorError::Connection(format!("request build: {e}")))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| ExecutorError::Connection(format!("{addr}: {e}")))?;

            let status = resp.status().as_u16();
            let collected = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| ExecutorError::Connection(format!("{addr}: body: {e}")))?;
            Ok((status, collected.to_bytes().to_vec()))
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(ExecutorError::Timeout(timeout)),
        }
    }
}

/// Classify an agent response into an ack or an error.
fn parse_ack(status: u16, body: &[u8]) -> ExecutorResult<ExecuteAck> {
    let text = || String::from_utf8_lossy(body).into_owned();
    match status {
        200..=299 => serde_json::from_slice(body).map_err(|e| ExecutorError::Response {
            status,
            body: format!("malformed ack: {e}"),
        }),
        400..=499 => Err(ExecutorError::Validation(text())),
        500..=599 => Err(ExecutorError::Unavailable(format!("status {status}: {}", text()))),
        other => Err(ExecutorError::Response {
            status: other,
            body: text(),
        }),
    }
}
