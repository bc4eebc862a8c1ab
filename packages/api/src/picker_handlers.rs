// ABOUTME: HTTP request handlers for the component picker
// ABOUTME: Injection, rollback and status per session plus the shared picker script

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use splitlab_preview::{InjectionOutcome, PickerStatus, PICKER_SCRIPT};
use splitlab_sandbox::BestEffortReport;
use tracing::info;

use crate::response::{ok, ApiResult};
use crate::AppState;

/// GET /api/sessions/{id}/picker
pub async fn picker_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<PickerStatus> {
    ok(state.orchestrator.picker_status(&session_id).await?)
}

/// POST /api/sessions/{id}/picker
pub async fn inject_picker(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<InjectionOutcome> {
    info!("Injecting picker into session {}", session_id);
    ok(state.orchestrator.inject_picker(&session_id).await?)
}

/// POST /api/sessions/{id}/picker/rollback
pub async fn rollback_picker(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<BestEffortReport> {
    info!("Rolling back picker for session {}", session_id);
    ok(state.orchestrator.rollback_picker(&session_id).await?)
}

/// GET /api/picker/script
pub async fn picker_script() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        PICKER_SCRIPT,
    )
}
