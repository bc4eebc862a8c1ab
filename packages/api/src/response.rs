// ABOUTME: Shared API response types and error handling
// ABOUTME: Provides consistent response format across all API endpoints

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json as ResponseJson, Response},
};
use serde::Serialize;
use splitlab_sandbox::SandboxError;
use splitlab_sessions::SessionError;
use tracing::error;

/// Standard API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Error returned by handlers, rendered as an `ApiResponse` envelope
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        if err.is_not_found() {
            ApiError::NotFound(err.to_string())
        } else if matches!(
            err,
            SessionError::InvalidRequest(_)
                | SessionError::Sandbox(SandboxError::InvalidRequest(_) | SandboxError::NotAFile(_))
        ) {
            ApiError::BadRequest(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal(message) => {
                error!("Request failed: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };

        (status, ResponseJson(ApiResponse::<()>::error(message))).into_response()
    }
}

pub type ApiResult<T> = Result<ResponseJson<ApiResponse<T>>, ApiError>;

/// Wrap a successful value in the envelope
pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(ResponseJson(ApiResponse::success(data)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_errors_map_to_status() {
        let not_found: ApiError = SessionError::SessionNotFound("x".to_string()).into();
        assert!(matches!(not_found, ApiError::NotFound(_)));

        let bad: ApiError = SessionError::InvalidRequest("repoUrl is required".to_string()).into();
        assert!(matches!(bad, ApiError::BadRequest(_)));

        let internal: ApiError = SessionError::NoPortAvailable { floor: 4100 }.into();
        assert!(matches!(internal, ApiError::Internal(_)));
    }

    #[test]
    fn test_error_envelope_shape() {
        let body = serde_json::to_value(ApiResponse::<()>::error("boom".to_string())).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["data"], serde_json::Value::Null);
        assert_eq!(body["error"], "boom");
    }
}
