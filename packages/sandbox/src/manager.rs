// ABOUTME: Sandbox lifecycle manager keyed by session id
// ABOUTME: Owns the session-to-container cache and multiplexes exec and file I/O into sandboxes

use crate::archive;
use crate::error::{Result, SandboxError};
use crate::listing::{parse_ls_output, DirectoryEntry};
use crate::outcome::BestEffortReport;
use crate::providers::{ContainerConfig, ContainerStatus, PortMapping, Provider, ProviderError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use splitlab_config as config;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Naming convention shared by every session container; the orphan reaper matches on it
pub const SANDBOX_NAME_PREFIX: &str = "splitlab-session-";

/// Working directory inside every sandbox
pub const WORKSPACE_DIR: &str = "/workspace";

/// Graceful stop period before a container is killed
const STOP_GRACE_SECS: u64 = 10;

const BASE_DOCKERFILE: &str = include_str!("../assets/Dockerfile");

const MANAGED_LABEL: &str = "splitlab.managed";
const SESSION_LABEL: &str = "splitlab.session_id";

/// Image and resource ceilings applied to every sandbox
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSettings {
    pub image: String,
    pub memory_mb: u64,
    pub cpu_cores: f64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            image: config::DEFAULT_BASE_IMAGE.to_string(),
            memory_mb: config::DEFAULT_SANDBOX_MEMORY_MB,
            cpu_cores: config::DEFAULT_SANDBOX_CPU_CORES,
        }
    }
}

impl SandboxSettings {
    /// Read settings from the environment, falling back to defaults for missing or
    /// out-of-range values
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let image = std::env::var(config::SPLITLAB_BASE_IMAGE)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.image);

        let memory_mb = std::env::var(config::SPLITLAB_SANDBOX_MEMORY_MB)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| (256..=65536).contains(&v))
            .unwrap_or(defaults.memory_mb);

        let cpu_cores = std::env::var(config::SPLITLAB_SANDBOX_CPU_CORES)
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|&v| v > 0.0 && v <= 64.0)
            .unwrap_or(defaults.cpu_cores);

        Self {
            image,
            memory_mb,
            cpu_cores,
        }
    }
}

/// Detached process started inside a sandbox (the dev server)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundProcess {
    pub exec_id: String,
    pub command: Vec<String>,
    pub started_at: DateTime<Utc>,
}

/// Live sandbox bound to one session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxHandle {
    pub session_id: String,
    pub container_id: String,
    pub container_name: String,
    #[serde(skip)]
    pub ports: Vec<PortMapping>,
    pub created_at: DateTime<Utc>,
    pub background: Option<BackgroundProcess>,
}

/// Captured output of a command run to completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into a `CommandFailed` error
    pub fn check(self, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(SandboxError::CommandFailed {
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Container name for a session
pub fn sandbox_name(session_id: &str) -> String {
    format!("{}{}", SANDBOX_NAME_PREFIX, session_id)
}

/// Sandbox lifecycle manager
pub struct SandboxManager {
    provider: Arc<dyn Provider>,
    settings: SandboxSettings,
    sandboxes: RwLock<HashMap<String, SandboxHandle>>,
    /// Serializes the lazy base image build
    image_ready: Mutex<bool>,
}

impl SandboxManager {
    pub fn new(provider: Arc<dyn Provider>, settings: SandboxSettings) -> Self {
        Self {
            provider,
            settings,
            sandboxes: RwLock::new(HashMap::new()),
            image_ready: Mutex::new(false),
        }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    /// Create and start a sandbox for a session
    ///
    /// The base image is built on first use. A container that starts but does not
    /// reach the running state (e.g. host resource exhaustion) is removed and reported
    /// as a failure.
    pub async fn create_sandbox(
        &self,
        session_id: &str,
        ports: Vec<PortMapping>,
    ) -> Result<SandboxHandle> {
        if session_id.is_empty() {
            return Err(SandboxError::InvalidRequest(
                "session_id cannot be empty".to_string(),
            ));
        }

        if self.sandboxes.read().await.contains_key(session_id) {
            return Err(SandboxError::SandboxAlreadyExists(session_id.to_string()));
        }

        self.ensure_base_image().await?;

        let name = sandbox_name(session_id);
        let config = ContainerConfig {
            image: self.settings.image.clone(),
            name: name.clone(),
            env_vars: HashMap::new(),
            ports: ports.clone(),
            cpu_cores: self.settings.cpu_cores,
            memory_mb: self.settings.memory_mb,
            command: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            working_dir: Some(WORKSPACE_DIR.to_string()),
            labels: HashMap::from([
                (MANAGED_LABEL.to_string(), "true".to_string()),
                (SESSION_LABEL.to_string(), session_id.to_string()),
            ]),
        };

        let container_id = self.provider.create_container(&config).await?;

        let info = match self.provider.get_container_info(&container_id).await {
            Ok(info) => info,
            Err(e) => {
                self.discard_container(&container_id).await;
                return Err(e.into());
            }
        };

        if info.status != ContainerStatus::Running {
            error!(
                "Container {} for session {} is not running after start: {:?}",
                name, session_id, info.status
            );
            self.discard_container(&container_id).await;
            return Err(SandboxError::NotRunning {
                name,
                state: format!("{:?}", info.status),
            });
        }

        let handle = SandboxHandle {
            session_id: session_id.to_string(),
            container_id,
            container_name: name,
            ports,
            created_at: Utc::now(),
            background: None,
        };

        self.sandboxes
            .write()
            .await
            .insert(session_id.to_string(), handle.clone());

        info!(
            "Sandbox {} ready for session {}",
            handle.container_name, session_id
        );
        Ok(handle)
    }

    /// Run a command to completion inside the session's sandbox
    pub async fn exec(
        &self,
        session_id: &str,
        argv: Vec<String>,
        working_dir: Option<&str>,
    ) -> Result<CommandOutput> {
        self.exec_with_env(session_id, argv, working_dir, None).await
    }

    pub async fn exec_with_env(
        &self,
        session_id: &str,
        argv: Vec<String>,
        working_dir: Option<&str>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<CommandOutput> {
        if argv.is_empty() {
            return Err(SandboxError::InvalidRequest(
                "command cannot be empty".to_string(),
            ));
        }

        let container_id = self.container_id(session_id).await?;
        let result = self
            .provider
            .exec_command(
                &container_id,
                argv,
                working_dir.map(str::to_string),
                env_vars,
            )
            .await?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&result.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
            exit_code: result.exit_code,
        })
    }

    /// Run `script` through `sh -c`
    pub async fn exec_shell(
        &self,
        session_id: &str,
        script: &str,
        working_dir: Option<&str>,
    ) -> Result<CommandOutput> {
        self.exec(
            session_id,
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            working_dir,
        )
        .await
    }

    /// Start a detached command and record it on the sandbox handle
    pub async fn spawn_background(
        &self,
        session_id: &str,
        argv: Vec<String>,
        working_dir: Option<&str>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<BackgroundProcess> {
        let container_id = self.container_id(session_id).await?;
        let exec_id = self
            .provider
            .exec_detached(
                &container_id,
                argv.clone(),
                working_dir.map(str::to_string),
                env_vars,
            )
            .await?;

        let process = BackgroundProcess {
            exec_id,
            command: argv,
            started_at: Utc::now(),
        };

        if let Some(handle) = self.sandboxes.write().await.get_mut(session_id) {
            handle.background = Some(process.clone());
        }

        Ok(process)
    }

    /// Read one file out of the sandbox
    pub async fn read_file(&self, session_id: &str, path: &str) -> Result<Vec<u8>> {
        validate_absolute(path)?;
        let container_id = self.container_id(session_id).await?;

        let tar = self
            .provider
            .download_archive(&container_id, path)
            .await
            .map_err(|e| match e {
                ProviderError::PathNotFound(_) => SandboxError::FileNotFound(path.to_string()),
                other => other.into(),
            })?;

        archive::unpack_first_file(&tar)?.ok_or_else(|| SandboxError::NotAFile(path.to_string()))
    }

    /// Read one file as UTF-8 text
    pub async fn read_text(&self, session_id: &str, path: &str) -> Result<String> {
        let bytes = self.read_file(session_id, path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write one file into the sandbox, creating its parent directory
    pub async fn write_file(&self, session_id: &str, path: &str, content: &[u8]) -> Result<()> {
        validate_absolute(path)?;
        let (parent, file_name) = split_path(path)?;

        self.exec(
            session_id,
            vec!["mkdir".to_string(), "-p".to_string(), parent.to_string()],
            None,
        )
        .await?
        .check("mkdir")?;

        let container_id = self.container_id(session_id).await?;
        let tar = archive::pack_file(file_name, content)?;
        self.provider
            .upload_archive(&container_id, parent, tar)
            .await?;

        debug!("Wrote {} bytes to {} in session {}", content.len(), path, session_id);
        Ok(())
    }

    pub async fn file_exists(&self, session_id: &str, path: &str) -> Result<bool> {
        let output = self
            .exec(
                session_id,
                vec!["test".to_string(), "-e".to_string(), path.to_string()],
                None,
            )
            .await?;
        Ok(output.success())
    }

    /// Delete files or directories inside the sandbox
    pub async fn remove_paths(&self, session_id: &str, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        for path in paths {
            validate_absolute(path)?;
        }

        let mut argv = vec!["rm".to_string(), "-rf".to_string()];
        argv.extend(paths.iter().cloned());
        self.exec(session_id, argv, None).await?.check("rm")?;
        Ok(())
    }

    /// List one directory level
    pub async fn list_directory(&self, session_id: &str, path: &str) -> Result<Vec<DirectoryEntry>> {
        validate_absolute(path)?;

        let output = self
            .exec(
                session_id,
                vec!["ls".to_string(), "-la".to_string(), path.to_string()],
                None,
            )
            .await?;

        if !output.success() {
            if output.stderr.contains("No such file") {
                return Err(SandboxError::FileNotFound(path.to_string()));
            }
            return Err(SandboxError::CommandFailed {
                command: "ls".to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        Ok(parse_ls_output(path, &output.stdout))
    }

    /// Stop and remove the session's sandbox
    ///
    /// Never fails: problems are logged and returned in the report.
    pub async fn destroy_sandbox(&self, session_id: &str) -> BestEffortReport {
        let mut report = BestEffortReport::new();

        let Some(handle) = self.sandboxes.write().await.remove(session_id) else {
            report.degraded("lookup", SandboxError::SandboxNotFound(session_id.to_string()));
            return report;
        };
        report.completed("evict");

        info!(
            "Destroying sandbox {} for session {}",
            handle.container_name, session_id
        );

        report.record(
            "stop",
            self.provider
                .stop_container(&handle.container_id, STOP_GRACE_SECS)
                .await,
        );
        report.record(
            "remove",
            self.provider
                .remove_container(&handle.container_id, true)
                .await,
        );

        report
    }

    /// Force-remove every container following the session naming convention,
    /// whether or not it is in the cache
    pub async fn reap_orphans(&self) -> Result<BestEffortReport> {
        let containers = self.provider.list_containers(SANDBOX_NAME_PREFIX).await?;
        let mut report = BestEffortReport::new();

        info!("Reaping {} session containers", containers.len());

        for container in containers {
            let result = self.provider.remove_container(&container.id, true).await;
            if result.is_ok() {
                self.sandboxes
                    .write()
                    .await
                    .retain(|_, handle| handle.container_id != container.id);
            }
            report.record(format!("remove {}", container.name), result);
        }

        Ok(report)
    }

    pub async fn get_sandbox(&self, session_id: &str) -> Option<SandboxHandle> {
        self.sandboxes.read().await.get(session_id).cloned()
    }

    pub async fn list_sessions(&self) -> Vec<String> {
        self.sandboxes.read().await.keys().cloned().collect()
    }

    async fn container_id(&self, session_id: &str) -> Result<String> {
        self.sandboxes
            .read()
            .await
            .get(session_id)
            .map(|handle| handle.container_id.clone())
            .ok_or_else(|| SandboxError::SandboxNotFound(session_id.to_string()))
    }

    async fn ensure_base_image(&self) -> Result<()> {
        let mut ready = self.image_ready.lock().await;
        if *ready {
            return Ok(());
        }

        let image = &self.settings.image;
        let exists = self
            .provider
            .image_exists(image)
            .await
            .map_err(|e| SandboxError::ImageError(e.to_string()))?;

        if !exists {
            info!("Base image {} not found, building it", image);
            self.provider
                .build_image(image, BASE_DOCKERFILE)
                .await
                .map_err(|e| SandboxError::ImageError(e.to_string()))?;
        }

        *ready = true;
        Ok(())
    }

    async fn discard_container(&self, container_id: &str) {
        if let Err(e) = self.provider.remove_container(container_id, true).await {
            warn!("Failed to remove container {}: {}", container_id, e);
        }
    }
}

fn validate_absolute(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(SandboxError::InvalidRequest(format!(
            "path must be absolute: {}",
            path
        )));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(SandboxError::InvalidRequest(format!(
            "path cannot contain '..': {}",
            path
        )));
    }
    Ok(())
}

fn split_path(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((_, name)) if name.is_empty() => Err(SandboxError::InvalidRequest(format!(
            "path has no file name: {}",
            path
        ))),
        Some(("", name)) => Ok(("/", name)),
        Some((parent, name)) => Ok((parent, name)),
        None => Err(SandboxError::InvalidRequest(format!(
            "path has no file name: {}",
            path
        ))),
    }
}
