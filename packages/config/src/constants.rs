// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Splitlab

// API Server Configuration
pub const SPLITLAB_API_PORT: &str = "SPLITLAB_API_PORT";
pub const SPLITLAB_API_HOST: &str = "SPLITLAB_API_HOST";
pub const PORT: &str = "PORT"; // Legacy

// CORS Configuration
pub const SPLITLAB_CORS_ORIGIN: &str = "SPLITLAB_CORS_ORIGIN";

// Sandbox Configuration
pub const SPLITLAB_BASE_IMAGE: &str = "SPLITLAB_BASE_IMAGE";
pub const SPLITLAB_SANDBOX_MEMORY_MB: &str = "SPLITLAB_SANDBOX_MEMORY_MB";
pub const SPLITLAB_SANDBOX_CPU_CORES: &str = "SPLITLAB_SANDBOX_CPU_CORES";

// Preview Configuration
pub const SPLITLAB_PREVIEW_PORT_FLOOR: &str = "SPLITLAB_PREVIEW_PORT_FLOOR";
pub const SPLITLAB_READINESS_ATTEMPTS: &str = "SPLITLAB_READINESS_ATTEMPTS";
pub const SPLITLAB_READINESS_INTERVAL_MS: &str = "SPLITLAB_READINESS_INTERVAL_MS";

// Session Reclamation
pub const SPLITLAB_STALE_TIMEOUT_MINUTES: &str = "SPLITLAB_STALE_TIMEOUT_MINUTES";
pub const SPLITLAB_CLEANUP_INTERVAL_MINUTES: &str = "SPLITLAB_CLEANUP_INTERVAL_MINUTES";

// Defaults
pub const DEFAULT_API_PORT: u16 = 4001;
pub const DEFAULT_API_HOST: &str = "127.0.0.1";
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";
pub const DEFAULT_BASE_IMAGE: &str = "splitlab-sandbox:latest";
pub const DEFAULT_SANDBOX_MEMORY_MB: u64 = 2048;
pub const DEFAULT_SANDBOX_CPU_CORES: f64 = 1.0;
pub const DEFAULT_PREVIEW_PORT_FLOOR: u16 = 4100;
pub const DEFAULT_READINESS_ATTEMPTS: u32 = 30;
pub const DEFAULT_READINESS_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_STALE_TIMEOUT_MINUTES: i64 = 60;
pub const DEFAULT_CLEANUP_INTERVAL_MINUTES: u64 = 5;
