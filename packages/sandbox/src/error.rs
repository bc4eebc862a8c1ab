// ABOUTME: Error types for sandbox lifecycle operations
// ABOUTME: Separates caller misuse (unknown session, missing file) from runtime failures

use crate::providers::ProviderError;
use thiserror::Error;

/// Main error type for sandbox operations
#[derive(Error, Debug)]
pub enum SandboxError {
    /// No sandbox is cached for the session
    #[error("Sandbox not found for session: {0}")]
    SandboxNotFound(String),

    /// A sandbox already exists for the session
    #[error("Sandbox already exists for session: {0}")]
    SandboxAlreadyExists(String),

    /// Container started but never reached the running state
    #[error("Container {name} is not running after start (state: {state})")]
    NotRunning { name: String, state: String },

    /// Base image could not be built or inspected
    #[error("Base image error: {0}")]
    ImageError(String),

    /// File does not exist inside the sandbox
    #[error("File not found in sandbox: {0}")]
    FileNotFound(String),

    /// Path exists but is not a regular file
    #[error("Not a regular file: {0}")]
    NotAFile(String),

    /// Invalid path or argument
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A command exited with a non-zero status
    #[error("Command {command} failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i64,
        stderr: String,
    },

    /// Container runtime errors
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Archive packing/unpacking errors
    #[error("Archive error: {0}")]
    Archive(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SandboxError {
    /// Whether the error means the addressed session or file does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SandboxError::SandboxNotFound(_) | SandboxError::FileNotFound(_)
        )
    }
}

/// Result type alias for sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;
