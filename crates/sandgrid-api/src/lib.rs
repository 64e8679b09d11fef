//! sandgrid-api — REST surface for the SandGrid control plane.
//!
//! Thin axum handlers over [`sandgrid_lifecycle::SessionManager`].
//! Domain errors map to 4xx responses, infrastructure faults to 5xx;
//! the agent-facing callback routes live under `/internal` and are
//! bearer-authenticated with per-execution derived tokens.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/sessions` | Create a session |
//! | GET | `/api/v1/sessions` | List sessions |
//! | GET | `/api/v1/sessions/{id}` | Get session details |
//! | DELETE | `/api/v1/sessions/{id}` | Terminate a session |
//! | POST | `/api/v1/sessions/{id}/heartbeat` | Keep a session alive |
//! | POST | `/api/v1/sessions/{id}/execute` | Submit an execution |
//! | GET | `/api/v1/sessions/{id}/executions` | List a session's executions |
//! | GET | `/api/v1/executions/{id}` | Get execution status |
//! | GET | `/api/v1/executions/{id}/result` | Get a finished result |
//! | GET | `/api/v1/nodes` | List runtime nodes |
//! | POST | `/internal/executions/{id}/result` | Agent result callback |
//! | POST | `/internal/executions/{id}/heartbeat` | Agent keep-alive |
//! | GET | `/healthz` | Liveness |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};

use sandgrid_lifecycle::SessionManager;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub manager: SessionManager,
}

/// Build the complete API router.
pub fn build_router(manager: SessionManager) -> Router {
    let state = ApiState { manager };

    let api_routes = Router::new()
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::terminate_session),
        )
        .route("/sessions/{id}/heartbeat", post(handlers::session_heartbeat))
        .route("/sessions/{id}/execute", post(handlers::execute_code))
        .route("/sessions/{id}/executions", get(handlers::list_executions))
        .route("/executions/{id}", get(handlers::get_execution))
        .route("/executions/{id}/result", get(handlers::get_execution_result))
        .route("/nodes", get(handlers::list_nodes))
        .with_state(state.clone());

    let internal_routes = Router::new()
        .route("/executions/{id}/result", post(handlers::apply_execution_result))
        .route(
            "/executions/{id}/heartbeat",
            post(handlers::execution_heartbeat),
        )
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/internal", internal_routes)
        .route("/healthz", get(handlers::healthz))
}
