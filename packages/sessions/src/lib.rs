//! SplitLab Sessions - session lifecycle orchestration
//!
//! Owns the in-memory session registry, the progress bus that streams setup logs to
//! clients, and the orchestrator that takes a repository URL to a running preview.

pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod readiness;
pub mod registry;
pub mod settings;
pub mod subscription;
pub mod types;

pub use error::{Result, SessionError};
pub use orchestrator::{execution_id, repo_name_from_url, Admission, SessionOrchestrator};
pub use progress::{ProgressBus, ProgressMessage, Severity, EXECUTION_RETENTION};
pub use readiness::ReadinessProbe;
pub use registry::{SessionCallback, SessionRegistry};
pub use settings::{SessionSettings, CONTAINER_DEV_PORT, REPO_DIR};
pub use subscription::Subscription;
pub use types::{BuildStatus, Session, SessionStatus, SessionUpdate, SetupOutcome, SetupRequest};
