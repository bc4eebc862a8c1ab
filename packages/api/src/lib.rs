// ABOUTME: HTTP API layer for SplitLab providing REST endpoints and routing
// ABOUTME: Integration layer over the session orchestrator

use axum::{
    routing::{get, post},
    Router,
};
use splitlab_sessions::SessionOrchestrator;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod health;
pub mod picker_handlers;
pub mod progress_stream;
pub mod response;
pub mod sessions_handlers;

pub use response::{ApiError, ApiResponse};

/// Shared state for every handler
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SessionOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<SessionOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

/// Creates the sessions API router (nested under /api/sessions)
pub fn create_sessions_router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(sessions_handlers::list_sessions).post(sessions_handlers::create_session),
        )
        .route("/cleanup-stale", post(sessions_handlers::cleanup_stale))
        .route(
            "/{id}",
            get(sessions_handlers::get_session).delete(sessions_handlers::delete_session),
        )
        .route("/{id}/files", get(sessions_handlers::list_files))
        .route("/{id}/file", get(sessions_handlers::read_file))
        // Component picker
        .route(
            "/{id}/picker",
            get(picker_handlers::picker_status).post(picker_handlers::inject_picker),
        )
        .route(
            "/{id}/picker/rollback",
            post(picker_handlers::rollback_picker),
        )
}

/// Creates the full API router with request tracing
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health_check))
        .nest("/api/sessions", create_sessions_router())
        .route("/api/picker/script", get(picker_handlers::picker_script))
        .route(
            "/api/progress/{execution_id}/stream",
            get(progress_stream::stream_progress),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
