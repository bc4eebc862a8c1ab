use splitlab_sandbox::SandboxError;

/// Why build detection fell back to defaults
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("No manifest found at {0}")]
    MissingManifest(String),

    #[error("Invalid package.json: {0}")]
    InvalidManifest(#[from] serde_json::Error),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Error types for injection and rollback
#[derive(Debug, thiserror::Error)]
pub enum InjectionError {
    #[error("Failed to install picker asset at {path}: {source}")]
    AssetInstall {
        path: String,
        #[source]
        source: SandboxError,
    },

    #[error("Invalid injection manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl InjectionError {
    pub fn is_not_found(&self) -> bool {
        match self {
            InjectionError::Sandbox(e) => matches!(e, SandboxError::SandboxNotFound(_)),
            InjectionError::AssetInstall { source, .. } => {
                matches!(source, SandboxError::SandboxNotFound(_))
            }
            InjectionError::Manifest(_) => false,
        }
    }
}

/// Result type for injection operations
pub type InjectionResult<T> = Result<T, InjectionError>;
