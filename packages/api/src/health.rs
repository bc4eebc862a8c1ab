use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// GET /api/health
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().timestamp(),
        "version": env!("CARGO_PKG_VERSION"),
        "service": "splitlab",
        "sessions": state.orchestrator.registry().len().await,
    }))
}
