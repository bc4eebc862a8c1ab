// ABOUTME: HTTP request handlers for session setup, inspection and cleanup
// ABOUTME: Setup runs on its own task so a dropped client connection does not abort it

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use splitlab_sandbox::{BestEffortReport, DirectoryEntry};
use splitlab_sessions::{
    Admission, Session, SessionError, SessionStatus, SetupOutcome, SetupRequest,
};
use tracing::{error, info};

use crate::response::{ok, ApiError, ApiResult};
use crate::AppState;

/// Body of the stale cleanup request
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStaleRequest {
    #[serde(default)]
    pub max_inactivity_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStaleResponse {
    pub removed: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

/// Create a session and run its setup to completion
///
/// POST /api/sessions
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<SetupRequest>,
) -> (StatusCode, Json<SetupOutcome>) {
    info!("Creating session for {}", request.repo_url);

    let admission = match state.orchestrator.begin(&request).await {
        Ok(admission) => admission,
        Err(e) => {
            let status = match &e {
                SessionError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                SessionError::SessionAlreadyExists(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let outcome = SetupOutcome {
                success: false,
                message: "Failed to create session".to_string(),
                error: Some(e.to_string()),
                session_id: request.session_id.unwrap_or_default(),
                preview_url: None,
                warnings: Vec::new(),
            };
            return (status, Json(outcome));
        }
    };

    let orchestrator = state.orchestrator.clone();
    let session_id = admission.session().session_id.clone();
    let setup = tokio::spawn(async move {
        match admission {
            Admission::Started(session) => orchestrator.run_setup(&session.session_id).await,
            Admission::Attached(session) => orchestrator.await_setup(&session.session_id).await,
        }
    });

    match setup.await {
        Ok(outcome) if outcome.success => (StatusCode::OK, Json(outcome)),
        Ok(outcome) => (StatusCode::INTERNAL_SERVER_ERROR, Json(outcome)),
        Err(e) => {
            error!("Setup task for session {} panicked: {}", session_id, e);
            let outcome = SetupOutcome {
                success: false,
                message: "Setup failed".to_string(),
                error: Some(e.to_string()),
                session_id,
                preview_url: None,
                warnings: Vec::new(),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(outcome))
        }
    }
}

/// GET /api/sessions
pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<Vec<Session>> {
    ok(state.orchestrator.registry().list_all().await)
}

/// GET /api/sessions/{id}
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionStatus> {
    let session = state
        .orchestrator
        .registry()
        .get_session(&session_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Session not found: {}", session_id)))?;
    ok(SessionStatus::from(&session))
}

/// Destroy the sandbox and forget the session
///
/// DELETE /api/sessions/{id}
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<BestEffortReport> {
    info!("Cleaning up session {}", session_id);
    ok(state.orchestrator.cleanup_session(&session_id).await?)
}

/// Reclaim every session idle for longer than the given window
///
/// POST /api/sessions/cleanup-stale
pub async fn cleanup_stale(State(state): State<AppState>, body: Bytes) -> ApiResult<CleanupStaleResponse> {
    let request: CleanupStaleRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CleanupStaleRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))?
    };

    let max_inactivity = match request.max_inactivity_minutes {
        Some(minutes) if minutes < 0 => {
            return Err(ApiError::BadRequest(
                "maxInactivityMinutes cannot be negative".to_string(),
            ))
        }
        Some(minutes) => chrono::Duration::minutes(minutes),
        None => state.orchestrator.settings().stale_timeout,
    };

    let removed = state.orchestrator.cleanup_stale(max_inactivity).await;
    ok(CleanupStaleResponse {
        count: removed.len(),
        removed,
    })
}

/// GET /api/sessions/{id}/files?path=
pub async fn list_files(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Vec<DirectoryEntry>> {
    ok(state
        .orchestrator
        .list_files(&session_id, query.path.as_deref())
        .await?)
}

/// GET /api/sessions/{id}/file?path=
pub async fn read_file(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<FileContent> {
    let path = query
        .path
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("path is required".to_string()))?;
    let content = state.orchestrator.read_file(&session_id, &path).await?;
    ok(FileContent { path, content })
}
