//! SplitLab Preview - build detection and picker injection
//!
//! This crate inspects a repository cloned into a session sandbox to decide how to
//! install and serve it, and instruments its entry point with the component picker.

pub mod detector;
pub mod error;
pub mod injection;
pub mod picker;
pub mod types;

// Re-export key types and functions for easier use
pub use detector::BuildDetector;
pub use error::{DetectionError, InjectionError, InjectionResult};
pub use injection::{
    script_url, InjectionManifest, InjectionOutcome, InjectionStatus, Injector, PickerStatus,
    BACKUP_SUFFIX, INJECTION_MANIFEST, INJECTION_MARKER, PICKER_SCRIPT,
};
pub use picker::{PickerCommand, PickerEvent, SelectedComponent};
pub use types::{
    AnchorRule, BuildConfiguration, Framework, FrameworkStrategy, PackageManager,
    FRAMEWORK_SIGNATURES,
};

/// Version information for the preview crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
