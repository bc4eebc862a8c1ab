// ABOUTME: Container sandboxes for preview sessions
// ABOUTME: Provider seam over the container runtime plus the per-session sandbox manager

pub mod archive;
pub mod error;
pub mod listing;
pub mod manager;
pub mod outcome;
pub mod providers;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use error::{Result, SandboxError};
pub use listing::{DirectoryEntry, EntryKind};
pub use manager::{
    sandbox_name, BackgroundProcess, CommandOutput, SandboxHandle, SandboxManager,
    SandboxSettings, SANDBOX_NAME_PREFIX, WORKSPACE_DIR,
};
pub use outcome::{BestEffortReport, StepOutcome};
pub use providers::{
    ContainerConfig, ContainerInfo, ContainerStatus, DockerProvider, ExecResult, PortMapping,
    Provider, ProviderError,
};
