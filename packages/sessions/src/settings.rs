use splitlab_config as config;
use std::time::Duration;

/// Port the dev server listens on inside every sandbox
pub const CONTAINER_DEV_PORT: u16 = 3000;

/// Directory the repository is cloned into
pub const REPO_DIR: &str = "/workspace/repo";

/// Tunables for session setup and reclamation
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub port_floor: u16,
    pub container_port: u16,
    pub readiness_attempts: u32,
    pub readiness_interval: Duration,
    pub stale_timeout: chrono::Duration,
    pub cleanup_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            port_floor: config::DEFAULT_PREVIEW_PORT_FLOOR,
            container_port: CONTAINER_DEV_PORT,
            readiness_attempts: config::DEFAULT_READINESS_ATTEMPTS,
            readiness_interval: Duration::from_millis(config::DEFAULT_READINESS_INTERVAL_MS),
            stale_timeout: chrono::Duration::minutes(config::DEFAULT_STALE_TIMEOUT_MINUTES),
            cleanup_interval: Duration::from_secs(config::DEFAULT_CLEANUP_INTERVAL_MINUTES * 60),
        }
    }
}

impl SessionSettings {
    /// Read settings from the environment; missing or out-of-range values use defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port_floor = std::env::var(config::SPLITLAB_PREVIEW_PORT_FLOOR)
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .filter(|&v| v >= 1024)
            .unwrap_or(defaults.port_floor);

        let readiness_attempts = std::env::var(config::SPLITLAB_READINESS_ATTEMPTS)
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|&v| (1..=600).contains(&v))
            .unwrap_or(defaults.readiness_attempts);

        let readiness_interval = std::env::var(config::SPLITLAB_READINESS_INTERVAL_MS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| (50..=60_000).contains(&v))
            .map(Duration::from_millis)
            .unwrap_or(defaults.readiness_interval);

        let stale_timeout = std::env::var(config::SPLITLAB_STALE_TIMEOUT_MINUTES)
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|&v| (1..=7 * 24 * 60).contains(&v))
            .map(chrono::Duration::minutes)
            .unwrap_or(defaults.stale_timeout);

        let cleanup_interval = std::env::var(config::SPLITLAB_CLEANUP_INTERVAL_MINUTES)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| (1..=60).contains(&v))
            .map(|v| Duration::from_secs(v * 60))
            .unwrap_or(defaults.cleanup_interval);

        Self {
            port_floor,
            container_port: defaults.container_port,
            readiness_attempts,
            readiness_interval,
            stale_timeout,
            cleanup_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_falls_back_on_out_of_range_values() {
        std::env::set_var(config::SPLITLAB_READINESS_ATTEMPTS, "0");
        std::env::set_var(config::SPLITLAB_PREVIEW_PORT_FLOOR, "5200");
        std::env::set_var(config::SPLITLAB_CLEANUP_INTERVAL_MINUTES, "not-a-number");

        let settings = SessionSettings::from_env();

        std::env::remove_var(config::SPLITLAB_READINESS_ATTEMPTS);
        std::env::remove_var(config::SPLITLAB_PREVIEW_PORT_FLOOR);
        std::env::remove_var(config::SPLITLAB_CLEANUP_INTERVAL_MINUTES);

        assert_eq!(settings.readiness_attempts, 30);
        assert_eq!(settings.port_floor, 5200);
        assert_eq!(settings.cleanup_interval, Duration::from_secs(300));
    }
}
