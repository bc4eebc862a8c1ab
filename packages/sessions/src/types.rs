use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Setup progress of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Idle,
    Cloning,
    Building,
    Running,
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Idle => "idle",
            BuildStatus::Cloning => "cloning",
            BuildStatus::Building => "building",
            BuildStatus::Running => "running",
            BuildStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Running | BuildStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            BuildStatus::Idle => 0,
            BuildStatus::Cloning => 1,
            BuildStatus::Building => 2,
            BuildStatus::Running => 3,
            BuildStatus::Failed => 4,
        }
    }

    /// Status only moves forward; `failed` is reachable from any non-terminal state
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next == BuildStatus::Failed || next.rank() > self.rank()
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible record of one sandbox session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    /// Name of the backing container
    pub sandbox_id: String,
    pub repo_url: Option<String>,
    pub repo_name: Option<String>,
    pub branch: Option<String>,
    pub framework: Option<String>,
    pub preview_port: Option<u16>,
    pub build_status: BuildStatus,
    pub preview_ready: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        sandbox_id: impl Into<String>,
        repo_url: Option<String>,
        branch: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            sandbox_id: sandbox_id.into(),
            repo_url,
            repo_name: None,
            branch,
            framework: None,
            preview_port: None,
            build_status: BuildStatus::Idle,
            preview_ready: false,
            error: None,
            created_at: now,
            last_activity: now,
        }
    }
}

/// Partial update merged into a session; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub repo_name: Option<String>,
    pub framework: Option<String>,
    pub preview_port: Option<u16>,
    pub build_status: Option<BuildStatus>,
    pub preview_ready: Option<bool>,
    pub error: Option<String>,
}

impl SessionUpdate {
    pub fn status(status: BuildStatus) -> Self {
        Self {
            build_status: Some(status),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            build_status: Some(BuildStatus::Failed),
            preview_ready: Some(false),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub(crate) fn apply(self, session: &mut Session) {
        if let Some(repo_name) = self.repo_name {
            session.repo_name = Some(repo_name);
        }
        if let Some(framework) = self.framework {
            session.framework = Some(framework);
        }
        if let Some(port) = self.preview_port {
            session.preview_port = Some(port);
        }
        if let Some(status) = self.build_status {
            session.build_status = status;
        }
        if let Some(ready) = self.preview_ready {
            session.preview_ready = ready;
        }
        if let Some(error) = self.error {
            session.error = Some(error);
        }
    }
}

/// Compact status view polled by clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: String,
    pub build_status: BuildStatus,
    pub preview_ready: bool,
    pub repo_name: Option<String>,
    pub framework: Option<String>,
    pub preview_port: Option<u16>,
    pub error: Option<String>,
}

impl From<&Session> for SessionStatus {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.session_id.clone(),
            build_status: session.build_status,
            preview_ready: session.preview_ready,
            repo_name: session.repo_name.clone(),
            framework: session.framework.clone(),
            preview_port: session.preview_port,
            error: session.error.clone(),
        }
    }
}

/// Body of a setup request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRequest {
    pub repo_url: String,
    #[serde(default)]
    pub branch: Option<String>,
    /// Client-chosen id, letting the client open the progress stream before setup returns
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Result of a setup run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_only() {
        use BuildStatus::*;

        assert!(Idle.can_transition_to(Cloning));
        assert!(Cloning.can_transition_to(Building));
        assert!(Building.can_transition_to(Running));
        assert!(Idle.can_transition_to(Failed));
        assert!(Building.can_transition_to(Failed));
        assert!(Cloning.can_transition_to(Cloning));

        assert!(!Building.can_transition_to(Cloning));
        assert!(!Running.can_transition_to(Building));
        assert!(!Running.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Running));
    }

    #[test]
    fn test_update_merges_only_present_fields() {
        let mut session = Session::new("s", "splitlab-session-s", None, None);
        session.repo_name = Some("demo".to_string());

        SessionUpdate {
            framework: Some("Vite".to_string()),
            ..SessionUpdate::status(BuildStatus::Building)
        }
        .apply(&mut session);

        assert_eq!(session.repo_name.as_deref(), Some("demo"));
        assert_eq!(session.framework.as_deref(), Some("Vite"));
        assert_eq!(session.build_status, BuildStatus::Building);
    }
}
