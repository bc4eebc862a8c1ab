// ABOUTME: Provider trait for the container runtime backing session sandboxes
// ABOUTME: Defines the abstract interface for container lifecycle, exec and archive transfer

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub mod docker;

pub use docker::DockerProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Path not found in container: {0}")]
    PathNotFound(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Container configuration for creating session sandboxes
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub image: String,
    pub name: String,
    pub env_vars: HashMap<String, String>,
    pub ports: Vec<PortMapping>,
    pub cpu_cores: f64,
    pub memory_mb: u64,
    pub command: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub labels: HashMap<String, String>,
}

/// Binding of a container-internal port to a host port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

/// Container runtime information
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Stopped,
    Dead,
    Unknown(String),
}

impl ContainerStatus {
    pub fn from_state(state: &str) -> Self {
        match state.to_lowercase().as_str() {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "restarting" => ContainerStatus::Restarting,
            "removing" => ContainerStatus::Removing,
            "exited" => ContainerStatus::Stopped,
            "dead" => ContainerStatus::Dead,
            other => ContainerStatus::Unknown(other.to_string()),
        }
    }
}

/// Result of running a command to completion inside a container
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Container runtime backend for session sandboxes
#[async_trait]
pub trait Provider: Send + Sync {
    /// Check if the runtime is reachable
    async fn is_available(&self) -> Result<bool>;

    /// Check if an image exists locally
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Build an image from a Dockerfile, tagging it `tag`
    async fn build_image(&self, tag: &str, dockerfile: &str) -> Result<()>;

    /// Create and start a new container, returning its id
    async fn create_container(&self, config: &ContainerConfig) -> Result<String>;

    /// Get container information
    async fn get_container_info(&self, container_id: &str) -> Result<ContainerInfo>;

    /// Stop a running container
    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()>;

    /// Remove a container
    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()>;

    /// List all containers (running or not) whose name starts with `name_prefix`
    async fn list_containers(&self, name_prefix: &str) -> Result<Vec<ContainerInfo>>;

    /// Run a command to completion, capturing stdout and stderr separately
    async fn exec_command(
        &self,
        container_id: &str,
        command: Vec<String>,
        working_dir: Option<String>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<ExecResult>;

    /// Start a command without waiting for it, returning the exec id
    async fn exec_detached(
        &self,
        container_id: &str,
        command: Vec<String>,
        working_dir: Option<String>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<String>;

    /// Extract a tar archive into `dest_dir` inside the container
    async fn upload_archive(&self, container_id: &str, dest_dir: &str, tar: Vec<u8>)
        -> Result<()>;

    /// Download `path` from the container as a tar archive
    async fn download_archive(&self, container_id: &str, path: &str) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_status_from_state() {
        assert_eq!(ContainerStatus::from_state("running"), ContainerStatus::Running);
        assert_eq!(ContainerStatus::from_state("Exited"), ContainerStatus::Stopped);
        assert_eq!(
            ContainerStatus::from_state("weird"),
            ContainerStatus::Unknown("weird".to_string())
        );
    }
}
