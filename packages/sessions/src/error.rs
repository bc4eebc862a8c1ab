// ABOUTME: Error types for session registry and orchestration
// ABOUTME: Not-found errors are kept distinct so callers can surface them as 404s

use crate::types::BuildStatus;
use splitlab_preview::InjectionError;
use splitlab_sandbox::SandboxError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already exists: {0}")]
    SessionAlreadyExists(String),

    #[error("Invalid build status transition from {from} to {to}")]
    InvalidTransition { from: BuildStatus, to: BuildStatus },

    #[error("No free preview port at or above {floor}")]
    NoPortAvailable { floor: u16 },

    #[error("Dev server did not become ready after {attempts} attempts")]
    NotReady { attempts: u32 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Injection(#[from] InjectionError),
}

impl SessionError {
    pub fn is_not_found(&self) -> bool {
        match self {
            SessionError::SessionNotFound(_) => true,
            SessionError::Sandbox(e) => e.is_not_found(),
            SessionError::Injection(e) => e.is_not_found(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
