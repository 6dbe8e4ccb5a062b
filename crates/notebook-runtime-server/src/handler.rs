//! Request handlers for sessions and code execution.
//!
//! This module provides HTTP handlers that map onto the session registry
//! and execution engine, plus figure serving and health checks.

use std::time::Instant;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use notebook_runtime_core::{ExecuteRequest, ExecutionResult};

use crate::request::{CreateSessionBody, ExecuteBody, NameList};
use crate::response::{ApiResponse, error_to_response};
use crate::state::AppState;

/// Execute response: the result plus the session that produced it.
#[derive(Serialize)]
struct ExecuteResponse<'a> {
    session_id: &'a str,
    #[serde(flatten)]
    result: &'a ExecutionResult,
}

fn invalid_body(rejection: &JsonRejection) -> ApiResponse {
    ApiResponse::error(
        rejection.status().as_u16(),
        &rejection.body_text(),
        "invalid_body",
    )
}

/// Create a session and make it active.
#[instrument(skip(state, body))]
pub async fn create_session(
    State(state): State<AppState>,
    body: Result<Json<CreateSessionBody>, JsonRejection>,
) -> ApiResponse {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return invalid_body(&rejection),
    };

    match state
        .registry()
        .create(&body.id, body.path, body.kind.as_deref())
        .await
    {
        Ok(info) => ApiResponse::json(201, &info),
        Err(e) => {
            warn!(session_id = %body.id, error = %e, "Session creation failed");
            error_to_response(&e)
        }
    }
}

/// List sessions and the active one.
pub async fn list_sessions(State(state): State<AppState>) -> ApiResponse {
    let listing = state.registry().list();
    ApiResponse::json(
        200,
        &serde_json::json!({
            "active_session": listing.active,
            "all_sessions": listing.sessions,
        }),
    )
}

/// Make a session active.
#[instrument(skip(state))]
pub async fn activate_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResponse {
    match state.registry().switch(&session_id) {
        Ok(()) => ApiResponse::json(200, &serde_json::json!({ "active_session": session_id })),
        Err(e) => error_to_response(&e),
    }
}

/// Describe one session.
pub async fn session_info(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResponse {
    match state.registry().get(&session_id) {
        Ok(session) => ApiResponse::json(200, &session.info()),
        Err(e) => error_to_response(&e),
    }
}

/// Shut down a named session.
#[instrument(skip(state))]
pub async fn shutdown_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResponse {
    shutdown(&state, Some(&session_id)).await
}

/// Shut down the active session.
#[instrument(skip(state))]
pub async fn shutdown_active(State(state): State<AppState>) -> ApiResponse {
    shutdown(&state, None).await
}

async fn shutdown(state: &AppState, target: Option<&str>) -> ApiResponse {
    match state.registry().shutdown(target).await {
        Ok(session_id) => ApiResponse::json(200, &serde_json::json!({ "shutdown": session_id })),
        Err(e) => error_to_response(&e),
    }
}

/// Run a code unit without recording it in history.
pub async fn execute_probe(
    State(state): State<AppState>,
    body: Result<Json<ExecuteBody>, JsonRejection>,
) -> ApiResponse {
    execute(&state, body, false, "probe").await
}

/// Run a code unit and record it in history on success.
pub async fn execute_step(
    State(state): State<AppState>,
    body: Result<Json<ExecuteBody>, JsonRejection>,
) -> ApiResponse {
    execute(&state, body, true, "step").await
}

/// Look up API documentation, e.g. `import math\nmath.floor.__doc__`.
///
/// Only `code` and `session` are honoured.
pub async fn execute_doc(
    State(state): State<AppState>,
    body: Result<Json<ExecuteBody>, JsonRejection>,
) -> ApiResponse {
    let body = body.map(|Json(body)| {
        Json(ExecuteBody {
            backup_vars: NameList::Empty,
            show_var: None,
            ..body
        })
    });
    execute(&state, body, false, "doc").await
}

async fn execute(
    state: &AppState,
    body: Result<Json<ExecuteBody>, JsonRejection>,
    add_to_history: bool,
    route: &'static str,
) -> ApiResponse {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return invalid_body(&rejection),
    };
    let (target, request) = match body.into_request(add_to_history) {
        Ok(parts) => parts,
        Err(e) => return error_to_response(&e),
    };
    run(state, target.as_deref(), &request, route).await
}

#[instrument(skip(state, request))]
async fn run(
    state: &AppState,
    target: Option<&str>,
    request: &ExecuteRequest,
    route: &'static str,
) -> ApiResponse {
    let start = Instant::now();
    let request_id = Uuid::new_v4().to_string();

    let session = match state.registry().resolve(target) {
        Ok(session) => session,
        Err(e) => return error_to_response(&e),
    };

    info!(
        request_id = %request_id,
        session_id = %session.id(),
        code_len = request.code.len(),
        backup_vars = request.backup_vars.len(),
        "Handling execute request"
    );

    match session.execute(request).await {
        Ok(mut result) => {
            state.figures().externalize(&mut result.display_data).await;

            info!(
                request_id = %request_id,
                duration_ms = start.elapsed().as_millis(),
                execution_count = result.execution_count,
                success = result.is_success(),
                "Request completed"
            );

            ApiResponse::json(
                200,
                &ExecuteResponse {
                    session_id: session.id(),
                    result: &result,
                },
            )
        }
        Err(e) if e.is_caller_error() => {
            warn!(
                request_id = %request_id,
                session_id = %session.id(),
                error = %e,
                "Request rejected"
            );
            error_to_response(&e)
        }
        Err(e) => {
            error!(
                request_id = %request_id,
                session_id = %session.id(),
                error = %e,
                duration_ms = start.elapsed().as_millis(),
                "Request failed"
            );
            error_to_response(&e)
        }
    }
}

/// Serve a persisted figure.
pub async fn get_figure(State(state): State<AppState>, Path(name): Path<String>) -> ApiResponse {
    match state.figures().load(&name).await {
        Ok(Some(bytes)) => ApiResponse::bytes(200, "image/png", bytes),
        Ok(None) => ApiResponse::error(404, "figure not found", "figure_not_found"),
        Err(e) => {
            error!(figure = %name, error = %e, "Failed to read figure");
            ApiResponse::error(500, "Internal server error", "io")
        }
    }
}

/// Health check handler.
///
/// Returns 200 OK if the server is running.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
///
/// Returns 200 OK with the number of registered sessions.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let listing = state.registry().list();
    let body = serde_json::json!({
        "status": "ready",
        "sessions": listing.sessions.len(),
        "active_session": listing.active,
    });

    (StatusCode::OK, Json(body))
}
