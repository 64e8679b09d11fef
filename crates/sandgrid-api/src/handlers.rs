//! REST API handlers.
//!
//! Each handler delegates to the `SessionManager` and renders a JSON
//! response. Error mapping lives in `status_for`.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use tracing::debug;

use sandgrid_core::{DomainError, ResourceLimit};
use sandgrid_executor::ResultReport;
use sandgrid_lifecycle::{
    CreateSessionRequest, LifecycleError, SubmitExecutionRequest, callback_token,
};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// Map a lifecycle error to an HTTP status.
fn status_for(err: &LifecycleError) -> StatusCode {
    match err {
        LifecycleError::Domain(domain) => match domain {
            DomainError::NotFound(_) | DomainError::TemplateNotFound(_) => StatusCode::NOT_FOUND,
            DomainError::Validation(_) | DomainError::ResourceLimit(_) => StatusCode::BAD_REQUEST,
            DomainError::InvalidStatus { .. } => StatusCode::CONFLICT,
            DomainError::SessionExpired(_) => StatusCode::GONE,
            DomainError::ExecutionTimeout(_) | DomainError::ExecutionCrashed(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            DomainError::NodeUnavailable(_) => StatusCode::TOO_MANY_REQUESTS,
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn render_error(err: &LifecycleError) -> axum::response::Response {
    error_response(&err.to_string(), status_for(err))
}

// ── Sessions ───────────────────────────────────────────────────────

/// POST /api/v1/sessions body.
#[derive(serde::Deserialize)]
pub struct CreateSessionBody {
    pub template_id: String,
    #[serde(default = "default_cpu")]
    pub cpu_cores: f64,
    #[serde(default = "default_memory")]
    pub memory_mb: u64,
    #[serde(default = "default_disk")]
    pub disk_mb: u64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
}

fn default_cpu() -> f64 {
    1.0
}
fn default_memory() -> u64 {
    512
}
fn default_disk() -> u64 {
    1024
}

/// POST /api/v1/sessions
pub async fn create_session(
    State(state): State<ApiState>,
    Json(body): Json<CreateSessionBody>,
) -> impl IntoResponse {
    let resources = match ResourceLimit::new(body.cpu_cores, body.memory_mb, body.disk_mb) {
        Ok(resources) => resources,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST),
    };

    let req = CreateSessionRequest {
        template_id: body.template_id,
        resources,
        timeout_secs: body.timeout_secs,
        env: body.env,
    };
    match state.manager.create_session(req).await {
        Ok(session) => (StatusCode::CREATED, ApiResponse::ok(session)).into_response(),
        Err(e) => render_error(&e),
    }
}

/// GET /api/v1/sessions
pub async fn list_sessions(State(state): State<ApiState>) -> impl IntoResponse {
    match state.manager.list_sessions() {
        Ok(sessions) => ApiResponse::ok(sessions).into_response(),
        Err(e) => render_error(&e),
    }
}

/// GET /api/v1/sessions/:id
pub async fn get_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.get_session(&id) {
        Ok(session) => ApiResponse::ok(session).into_response(),
        Err(e) => render_error(&e),
    }
}

/// DELETE /api/v1/sessions/:id
pub async fn terminate_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.terminate_session(&id).await {
        Ok(session) => ApiResponse::ok(session).into_response(),
        Err(e) => render_error(&e),
    }
}

/// POST /api/v1/sessions/:id/heartbeat
pub async fn session_heartbeat(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.record_session_heartbeat(&id).await {
        Ok(()) => ApiResponse::ok("ok").into_response(),
        Err(e) => render_error(&e),
    }
}

// ── Executions ─────────────────────────────────────────────────────

/// POST /api/v1/sessions/:id/execute body.
#[derive(serde::Deserialize)]
pub struct ExecuteBody {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub event: serde_json::Value,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// POST /api/v1/sessions/:id/execute
pub async fn execute_code(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<ExecuteBody>,
) -> impl IntoResponse {
    let req = SubmitExecutionRequest {
        code: body.code,
        language: body.language,
        event: body.event,
        timeout_secs: body.timeout_secs,
    };
    match state.manager.submit_execution(&id, req).await {
        Ok(execution) => (StatusCode::ACCEPTED, ApiResponse::ok(execution)).into_response(),
        Err(e) => render_error(&e),
    }
}

/// GET /api/v1/sessions/:id/executions
pub async fn list_executions(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.list_executions(&id) {
        Ok(executions) => ApiResponse::ok(executions).into_response(),
        Err(e) => render_error(&e),
    }
}

/// GET /api/v1/executions/:id
pub async fn get_execution(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.get_execution(&id) {
        Ok(execution) => ApiResponse::ok(execution).into_response(),
        Err(e) => render_error(&e),
    }
}

/// GET /api/v1/executions/:id/result
pub async fn get_execution_result(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.execution_result(&id) {
        Ok(execution) => ApiResponse::ok(execution).into_response(),
        Err(e) => render_error(&e),
    }
}

// ── Nodes ──────────────────────────────────────────────────────────

/// GET /api/v1/nodes
pub async fn list_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    let nodes = state.manager.scheduler().list_nodes().await;
    ApiResponse::ok(nodes).into_response()
}

// ── Internal (agent-facing) ────────────────────────────────────────

fn check_bearer(state: &ApiState, headers: &HeaderMap, execution_id: &str) -> bool {
    let expected = callback_token(&state.manager.config().callback_secret, execution_id);
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

/// POST /internal/executions/:id/result
pub async fn apply_execution_result(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(report): Json<ResultReport>,
) -> impl IntoResponse {
    if !check_bearer(&state, &headers, &id) {
        return error_response("invalid callback token", StatusCode::UNAUTHORIZED);
    }

    match state.manager.apply_result(&id, report).await {
        Ok(outcome) => {
            debug!(execution_id = %id, ?outcome, "result callback handled");
            ApiResponse::ok(serde_json::json!({
                "execution_id": id,
                "outcome": format!("{outcome:?}").to_lowercase(),
            }))
            .into_response()
        }
        Err(e) => render_error(&e),
    }
}

/// POST /internal/executions/:id/heartbeat
pub async fn execution_heartbeat(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !check_bearer(&state, &headers, &id) {
        return error_response("invalid callback token", StatusCode::UNAUTHORIZED);
    }

    match state.manager.record_execution_heartbeat(&id).await {
        Ok(()) => ApiResponse::ok("ok").into_response(),
        Err(e) => render_error(&e),
    }
}

// ── Health ─────────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok(serde_json::json!({"status": "ok"}))
}
