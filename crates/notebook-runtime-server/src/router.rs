//! HTTP router configuration.
//!
//! This module provides functions to build the Axum router with all
//! necessary routes and middleware.

use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handler::{
    activate_session, create_session, execute_doc, execute_probe, execute_step, get_figure,
    health_check, list_sessions, readiness_check, session_info, shutdown_active, shutdown_session,
};
use crate::state::AppState;

/// Build the main application router.
///
/// Routes:
/// - `POST /sessions` - Create a session and make it active
/// - `GET /sessions` - List sessions and the active one
/// - `DELETE /sessions` - Shut down the active session
/// - `GET /sessions/:session_id` - Describe a session
/// - `DELETE /sessions/:session_id` - Shut down a session
/// - `POST /sessions/:session_id/activate` - Switch the active session
/// - `POST /execute/probe` - Run code without recording history
/// - `POST /execute/step` - Run code and record it in history
/// - `POST /execute/doc` - Run a documentation lookup
/// - `GET /figures/:name` - Serve a persisted figure
/// - `GET /health` - Health check
/// - `GET /ready` - Readiness check
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let session_routes = Router::new()
        .route(
            "/sessions",
            post(create_session).get(list_sessions).delete(shutdown_active),
        )
        .route(
            "/sessions/:session_id",
            get(session_info).delete(shutdown_session),
        )
        .route("/sessions/:session_id/activate", post(activate_session));

    let execute_routes = Router::new()
        .route("/execute/probe", post(execute_probe))
        .route("/execute/step", post(execute_step))
        .route("/execute/doc", post(execute_doc));

    // Health and monitoring routes
    let health_routes = Router::new()
        .route("/figures/:name", get(get_figure))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check));

    Router::new()
        .merge(session_routes)
        .merge(execute_routes)
        .merge(health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
