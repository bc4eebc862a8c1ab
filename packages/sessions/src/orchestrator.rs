// ABOUTME: Session setup workflow: clone, detect, install, build, inject, run, poll
// ABOUTME: Also owns session cleanup and the periodic reclamation of idle sessions

use crate::error::{Result, SessionError};
use crate::progress::ProgressBus;
use crate::readiness::ReadinessProbe;
use crate::registry::SessionRegistry;
use crate::settings::{SessionSettings, REPO_DIR};
use crate::types::{BuildStatus, Session, SessionUpdate, SetupOutcome, SetupRequest};
use splitlab_preview::{
    BuildConfiguration, BuildDetector, Framework, InjectionOutcome, InjectionStatus, Injector,
    PickerStatus,
};
use splitlab_sandbox::{
    sandbox_name, BestEffortReport, DirectoryEntry, PortMapping, SandboxManager, WORKSPACE_DIR,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Progress execution id used for a session's setup
pub fn execution_id(session_id: &str) -> String {
    format!("setup-{}", session_id)
}

/// Last path segment of a repository URL without the `.git` suffix
pub fn repo_name_from_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(trimmed);
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() {
        "repo".to_string()
    } else {
        name.to_string()
    }
}

/// How a setup request was admitted by `begin`
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// A new session whose setup still has to be run
    Started(Session),
    /// An identical setup is already in progress; wait for it with `await_setup`
    Attached(Session),
}

impl Admission {
    pub fn session(&self) -> &Session {
        match self {
            Admission::Started(session) | Admission::Attached(session) => session,
        }
    }
}

/// Why a setup run stopped
struct SetupFailure {
    message: String,
    error: String,
}

impl SetupFailure {
    fn new(message: &str, error: impl std::fmt::Display) -> Self {
        Self {
            message: message.to_string(),
            error: error.to_string(),
        }
    }
}

/// Composes registry, sandbox, detection, injection and progress into the session lifecycle
pub struct SessionOrchestrator {
    registry: Arc<SessionRegistry>,
    sandbox: Arc<SandboxManager>,
    progress: Arc<ProgressBus>,
    injector: Injector,
    probe: ReadinessProbe,
    settings: SessionSettings,
}

impl SessionOrchestrator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        sandbox: Arc<SandboxManager>,
        progress: Arc<ProgressBus>,
        settings: SessionSettings,
    ) -> Self {
        let probe = ReadinessProbe::new(settings.readiness_attempts, settings.readiness_interval);
        Self {
            injector: Injector::new(sandbox.clone()),
            registry,
            sandbox,
            progress,
            probe,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn sandbox(&self) -> &Arc<SandboxManager> {
        &self.sandbox
    }

    pub fn progress(&self) -> &Arc<ProgressBus> {
        &self.progress
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Register the session and its progress execution without running setup
    ///
    /// A request with the same repository and branch as a setup still in progress attaches to
    /// that session instead of starting another one.
    pub async fn begin(&self, request: &SetupRequest) -> Result<Admission> {
        let repo_url = request.repo_url.trim();
        if repo_url.is_empty() {
            return Err(SessionError::InvalidRequest(
                "repoUrl is required".to_string(),
            ));
        }
        if repo_url.starts_with('-') {
            return Err(SessionError::InvalidRequest(format!(
                "invalid repository URL: {}",
                repo_url
            )));
        }

        let session_id = match &request.session_id {
            Some(id) => Uuid::parse_str(id)
                .map_err(|_| SessionError::InvalidRequest(format!("invalid sessionId: {}", id)))?
                .to_string(),
            None => Uuid::new_v4().to_string(),
        };

        let branch = request.branch.clone().filter(|b| !b.trim().is_empty());
        let dedup = ProgressBus::dedup_key(&format!(
            "{}#{}",
            repo_url,
            branch.as_deref().unwrap_or("")
        ));
        if let Some(session) = self.setup_in_progress(&dedup).await {
            info!(
                "Attaching request for {} to setup of session {}",
                repo_url, session.session_id
            );
            return Ok(Admission::Attached(session));
        }

        let session = Session::new(
            session_id.as_str(),
            sandbox_name(&session_id),
            Some(repo_url.to_string()),
            branch,
        );
        let session = self.registry.create_session(session).await?;

        self.progress.create(&execution_id(&session_id), Some(dedup));
        Ok(Admission::Started(session))
    }

    async fn setup_in_progress(&self, dedup: &str) -> Option<Session> {
        let exec_id = self.progress.lookup_by_dedup_key(dedup)?;
        if self.progress.is_completed(&exec_id) != Some(false) {
            return None;
        }
        let session_id = exec_id.strip_prefix("setup-")?;
        self.registry.get_session(session_id).await
    }

    /// Create a session and run its full setup
    pub async fn create_session(&self, request: SetupRequest) -> SetupOutcome {
        match self.begin(&request).await {
            Ok(Admission::Started(session)) => self.run_setup(&session.session_id).await,
            Ok(Admission::Attached(session)) => self.await_setup(&session.session_id).await,
            Err(e) => SetupOutcome {
                success: false,
                message: "Failed to create session".to_string(),
                error: Some(e.to_string()),
                session_id: request.session_id.unwrap_or_default(),
                preview_url: None,
                warnings: Vec::new(),
            },
        }
    }

    /// Wait for a setup started elsewhere to finish and report the session's resulting state
    pub async fn await_setup(&self, session_id: &str) -> SetupOutcome {
        let exec_id = execution_id(session_id);
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let subscription = self.progress.subscribe(
            &exec_id,
            move |message| {
                if message.is_final {
                    if let Some(tx) = tx.lock().ok().and_then(|mut tx| tx.take()) {
                        let _ = tx.send(());
                    }
                }
            },
            true,
        );
        if subscription.is_active() {
            // Err means the execution expired before completing
            let _ = rx.await;
        }
        subscription.unsubscribe();

        match self.registry.get_session(session_id).await {
            Some(session) if session.build_status == BuildStatus::Running => SetupOutcome {
                success: true,
                message: "Session is ready".to_string(),
                error: None,
                session_id: session.session_id,
                preview_url: session
                    .preview_port
                    .map(|port| format!("http://localhost:{}", port)),
                warnings: Vec::new(),
            },
            Some(session) => SetupOutcome {
                success: false,
                message: "Setup failed".to_string(),
                error: session.error,
                session_id: session.session_id,
                preview_url: None,
                warnings: Vec::new(),
            },
            None => SetupOutcome {
                success: false,
                message: "Setup failed".to_string(),
                error: Some(SessionError::SessionNotFound(session_id.to_string()).to_string()),
                session_id: session_id.to_string(),
                preview_url: None,
                warnings: Vec::new(),
            },
        }
    }

    /// Run setup for a session created with `begin`
    ///
    /// Failures are recorded on the session and returned in the outcome, never propagated.
    /// The sandbox of a failed session is kept for inspection until cleanup, unless the session
    /// itself was cleaned up while setup was running.
    pub async fn run_setup(&self, session_id: &str) -> SetupOutcome {
        let exec_id = execution_id(session_id);
        let mut warnings = BestEffortReport::new();

        match self.setup_steps(session_id, &exec_id, &mut warnings).await {
            Ok(preview_url) => {
                self.progress
                    .success(&exec_id, format!("Preview ready at {}", preview_url));
                self.progress.complete(&exec_id, true);
                info!("Session {} is running at {}", session_id, preview_url);

                SetupOutcome {
                    success: true,
                    message: "Session is ready".to_string(),
                    error: None,
                    session_id: session_id.to_string(),
                    preview_url: Some(preview_url),
                    warnings: warning_texts(&warnings),
                }
            }
            Err(failure) => {
                error!(
                    "Setup failed for session {}: {}: {}",
                    session_id, failure.message, failure.error
                );
                if self.registry.get_session(session_id).await.is_none() {
                    // Cleaned up mid-setup: the sandbox may have been created after cleanup ran
                    let report = self.sandbox.destroy_sandbox(session_id).await;
                    info!(
                        "Session {} was removed during setup, destroyed its sandbox ({} problems)",
                        session_id,
                        report.failures().count()
                    );
                } else if let Err(e) = self
                    .registry
                    .update_session(session_id, SessionUpdate::failed(failure.error.clone()))
                    .await
                {
                    warn!("Could not mark session {} failed: {}", session_id, e);
                }
                self.progress
                    .error(&exec_id, format!("{}: {}", failure.message, failure.error));
                self.progress.complete(&exec_id, false);

                SetupOutcome {
                    success: false,
                    message: failure.message,
                    error: Some(failure.error),
                    session_id: session_id.to_string(),
                    preview_url: None,
                    warnings: warning_texts(&warnings),
                }
            }
        }
    }

    async fn setup_steps(
        &self,
        session_id: &str,
        exec_id: &str,
        warnings: &mut BestEffortReport,
    ) -> std::result::Result<String, SetupFailure> {
        let session = self
            .registry
            .get_session(session_id)
            .await
            .ok_or_else(|| SetupFailure::new("Session not found", session_id))?;
        let repo_url = session
            .repo_url
            .clone()
            .ok_or_else(|| SetupFailure::new("Session has no repository", session_id))?;

        // idle -> cloning
        self.progress.info(exec_id, "Allocating preview port");
        let host_port = self
            .registry
            .claim_port(session_id, self.settings.port_floor)
            .await
            .map_err(|e| SetupFailure::new("Failed to allocate preview port", e))?;
        self.set_status(session_id, BuildStatus::Cloning).await?;

        self.progress.info(exec_id, "Creating sandbox");
        self.sandbox
            .create_sandbox(
                session_id,
                vec![PortMapping {
                    host_port,
                    container_port: self.settings.container_port,
                }],
            )
            .await
            .map_err(|e| SetupFailure::new("Failed to create sandbox", e))?;

        self.progress.info(exec_id, format!("Cloning {}", repo_url));
        let mut clone = vec![
            "git".to_string(),
            "clone".to_string(),
            "--depth".to_string(),
            "1".to_string(),
        ];
        if let Some(branch) = &session.branch {
            clone.push("--branch".to_string());
            clone.push(branch.clone());
        }
        clone.push(repo_url.clone());
        clone.push(REPO_DIR.to_string());

        let output = self
            .sandbox
            .exec(session_id, clone, Some(WORKSPACE_DIR))
            .await
            .map_err(|e| SetupFailure::new("Failed to clone repository", e))?;
        if !output.success() {
            return Err(SetupFailure::new(
                "Failed to clone repository",
                output.stderr.trim(),
            ));
        }

        let repo_name = repo_name_from_url(&repo_url);
        self.registry
            .update_session(
                session_id,
                SessionUpdate {
                    repo_name: Some(repo_name),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SetupFailure::new("Session update failed", e))?;

        // cloning -> building
        self.set_status(session_id, BuildStatus::Building).await?;
        let config = BuildDetector::detect(&self.sandbox, session_id, REPO_DIR).await;
        self.registry
            .update_session(
                session_id,
                SessionUpdate {
                    framework: Some(config.framework.display_name().to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SetupFailure::new("Session update failed", e))?;
        self.progress.info(
            exec_id,
            format!(
                "Detected {} project using {}",
                config.framework, config.package_manager
            ),
        );

        self.run_advisory(session_id, exec_id, "install", &config.install_command, warnings)
            .await;
        if let Some(build) = &config.build_command {
            self.run_advisory(session_id, exec_id, "build", build, warnings)
                .await;
        }

        self.progress.info(exec_id, "Injecting component picker");
        match self
            .injector
            .inject(session_id, REPO_DIR, config.framework)
            .await
        {
            Ok(outcome) => self.progress.info(exec_id, describe_injection(&outcome)),
            Err(e) => {
                warnings.degraded("inject picker", &e);
                self.progress
                    .info(exec_id, format!("Warning: picker injection failed: {}", e));
            }
        }

        self.start_dev_server(session_id, exec_id, &config).await?;

        let url = format!("http://127.0.0.1:{}/", host_port);
        self.progress.info(exec_id, "Waiting for dev server");
        self.probe
            .wait_until_ready(&url)
            .await
            .map_err(|e| SetupFailure::new("Dev server failed to start", e))?;

        // building -> running
        self.registry
            .update_session(
                session_id,
                SessionUpdate {
                    preview_ready: Some(true),
                    ..SessionUpdate::status(BuildStatus::Running)
                },
            )
            .await
            .map_err(|e| SetupFailure::new("Session update failed", e))?;

        Ok(format!("http://localhost:{}", host_port))
    }

    async fn set_status(
        &self,
        session_id: &str,
        status: BuildStatus,
    ) -> std::result::Result<(), SetupFailure> {
        self.registry
            .update_session(session_id, SessionUpdate::status(status))
            .await
            .map(|_| ())
            .map_err(|e| SetupFailure::new("Session update failed", e))
    }

    /// Install and build failures are warnings, never fatal
    async fn run_advisory(
        &self,
        session_id: &str,
        exec_id: &str,
        step: &str,
        command: &str,
        warnings: &mut BestEffortReport,
    ) {
        self.progress.info(exec_id, format!("Running {}", command));
        match self
            .sandbox
            .exec_shell(session_id, command, Some(REPO_DIR))
            .await
            .and_then(|output| output.check(command))
        {
            Ok(_) => self.progress.info(exec_id, format!("Finished {}", step)),
            Err(e) => {
                warnings.degraded(step, &e);
                self.progress
                    .info(exec_id, format!("Warning: {} failed: {}", step, e));
            }
        }
    }

    async fn start_dev_server(
        &self,
        session_id: &str,
        exec_id: &str,
        config: &BuildConfiguration,
    ) -> std::result::Result<(), SetupFailure> {
        let port = self.settings.container_port;
        let script = dev_server_script(config, port);

        self.progress
            .info(exec_id, format!("Starting dev server: {}", script));
        let env = HashMap::from([
            ("HOST".to_string(), "0.0.0.0".to_string()),
            ("PORT".to_string(), port.to_string()),
            ("BROWSER".to_string(), "none".to_string()),
        ]);

        self.sandbox
            .spawn_background(
                session_id,
                vec!["sh".to_string(), "-c".to_string(), script],
                Some(REPO_DIR),
                Some(env),
            )
            .await
            .map(|_| ())
            .map_err(|e| SetupFailure::new("Failed to start dev server", e))
    }

    /// Destroy the session's sandbox and forget the session
    pub async fn cleanup_session(&self, session_id: &str) -> Result<BestEffortReport> {
        if self.registry.get_session(session_id).await.is_none() {
            return Err(SessionError::SessionNotFound(session_id.to_string()));
        }

        let report = self.sandbox.destroy_sandbox(session_id).await;
        self.registry.delete_session(session_id).await;
        info!("Cleaned up session {}", session_id);
        Ok(report)
    }

    /// Sweep idle sessions and destroy their sandboxes
    pub async fn cleanup_stale(&self, max_inactivity: chrono::Duration) -> Vec<String> {
        let swept = self.registry.sweep_stale(max_inactivity).await;
        for session_id in &swept {
            let report = self.sandbox.destroy_sandbox(session_id).await;
            if !report.is_clean() {
                warn!(
                    "Stale session {} destroyed with {} problems",
                    session_id,
                    report.failures().count()
                );
            }
        }
        swept
    }

    /// Spawn the periodic sweep of idle sessions
    pub fn start_reclamation_task(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.settings.cleanup_interval;
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            info!(
                "Started session reclamation task (interval: {}s, timeout: {} minutes)",
                period.as_secs(),
                self.settings.stale_timeout.num_minutes()
            );

            loop {
                interval.tick().await;
                let swept = self.cleanup_stale(self.settings.stale_timeout).await;
                if !swept.is_empty() {
                    info!("Reclaimed {} idle sessions: {:?}", swept.len(), swept);
                }
            }
        })
    }

    pub async fn list_files(&self, session_id: &str, path: Option<&str>) -> Result<Vec<DirectoryEntry>> {
        self.touch(session_id).await?;
        let path = resolve_path(path);
        Ok(self.sandbox.list_directory(session_id, &path).await?)
    }

    pub async fn read_file(&self, session_id: &str, path: &str) -> Result<String> {
        self.touch(session_id).await?;
        let path = resolve_path(Some(path));
        Ok(self.sandbox.read_text(session_id, &path).await?)
    }

    pub async fn picker_status(&self, session_id: &str) -> Result<PickerStatus> {
        let framework = self.touch(session_id).await?;
        Ok(self.injector.status(session_id, REPO_DIR, framework).await?)
    }

    pub async fn inject_picker(&self, session_id: &str) -> Result<InjectionOutcome> {
        let framework = self.touch(session_id).await?;
        Ok(self.injector.inject(session_id, REPO_DIR, framework).await?)
    }

    pub async fn rollback_picker(&self, session_id: &str) -> Result<BestEffortReport> {
        self.touch(session_id).await?;
        Ok(self.injector.rollback(session_id).await?)
    }

    /// Refresh the session's activity and return its detected framework
    async fn touch(&self, session_id: &str) -> Result<Framework> {
        let session = self
            .registry
            .get_session(session_id)
            .await
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        Ok(session
            .framework
            .as_deref()
            .map(Framework::from_name)
            .unwrap_or(Framework::Unknown))
    }
}

/// Relative paths are taken from the repository root
fn resolve_path(path: Option<&str>) -> String {
    match path.map(str::trim).filter(|p| !p.is_empty()) {
        None => REPO_DIR.to_string(),
        Some(p) if p.starts_with('/') => p.to_string(),
        Some(p) => format!("{}/{}", REPO_DIR, p.trim_start_matches("./")),
    }
}

/// Shell script starting the dev server on `port` inside the sandbox
///
/// Frameworks without a port flag keep a port hard-coded in their script, so the script body is
/// run directly with that port replaced.
fn dev_server_script(config: &BuildConfiguration, port: u16) -> String {
    let pinned = config
        .dev_script
        .as_deref()
        .filter(|body| BuildDetector::extract_port(body).is_some_and(|p| p != port));

    match pinned {
        Some(body) if config.framework.strategy().port_flag.is_none() => {
            let mut script = format!(
                "export PATH=\"$PWD/node_modules/.bin:$PATH\"; {}",
                BuildDetector::rewrite_port(body, port)
            );
            let args = config.framework.dev_server_args(port);
            if !args.is_empty() {
                script.push(' ');
                script.push_str(&args.join(" "));
            }
            script
        }
        _ => {
            let args = config.framework.dev_server_args(port);
            if args.is_empty() {
                config.dev_command.clone()
            } else {
                format!("{} -- {}", config.dev_command, args.join(" "))
            }
        }
    }
}

fn describe_injection(outcome: &InjectionOutcome) -> String {
    match &outcome.status {
        InjectionStatus::Injected { file, .. } => format!("Picker injected into {}", file),
        InjectionStatus::AlreadyInjected { file } => format!("Picker already present in {}", file),
        InjectionStatus::NoEntryPoint => {
            "Warning: no entry point found for picker injection".to_string()
        }
    }
}

fn warning_texts(report: &BestEffortReport) -> Vec<String> {
    report
        .failures()
        .map(|(step, error)| format!("{}: {}", step, error))
        .collect()
}
