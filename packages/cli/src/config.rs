use splitlab_config as constants;
use splitlab_sandbox::SandboxSettings;
use splitlab_sessions::SessionSettings;
use std::env;
use std::net::IpAddr;
use std::num::ParseIntError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
    #[error("Invalid host address: {0}")]
    InvalidHost(String),
    #[error("Invalid CORS origin: {0}")]
    InvalidCorsOrigin(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub cors_origin: String,
    pub sandbox: SandboxSettings,
    pub sessions: SessionSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // SPLITLAB_API_PORT wins over the legacy PORT
        let port_str = env::var(constants::SPLITLAB_API_PORT)
            .or_else(|_| env::var(constants::PORT))
            .unwrap_or_else(|_| constants::DEFAULT_API_PORT.to_string());

        let port = port_str.trim().parse::<u16>()?;
        if port == 0 {
            return Err(ConfigError::PortOutOfRange(port));
        }

        let host_str = env::var(constants::SPLITLAB_API_HOST)
            .unwrap_or_else(|_| constants::DEFAULT_API_HOST.to_string());
        let host = host_str
            .trim()
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidHost(host_str.clone()))?;

        let cors_origin = env::var(constants::SPLITLAB_CORS_ORIGIN)
            .unwrap_or_else(|_| constants::DEFAULT_CORS_ORIGIN.to_string());
        if !cors_origin.starts_with("http://") && !cors_origin.starts_with("https://") {
            return Err(ConfigError::InvalidCorsOrigin(cors_origin));
        }

        Ok(Config {
            host,
            port,
            cors_origin,
            sandbox: SandboxSettings::from_env(),
            sessions: SessionSettings::from_env(),
        })
    }

    /// Same as `from_env` with the port replaced
    pub fn with_port(mut self, port: u16) -> Result<Self, ConfigError> {
        if port == 0 {
            return Err(ConfigError::PortOutOfRange(port));
        }
        self.port = port;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    fn clear() {
        for key in [
            constants::SPLITLAB_API_PORT,
            constants::PORT,
            constants::SPLITLAB_API_HOST,
            constants::SPLITLAB_CORS_ORIGIN,
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear();
        let config = Config::from_env().unwrap();

        assert_eq!(config.port, 4001);
        assert_eq!(config.host.to_string(), "127.0.0.1");
        assert_eq!(config.cors_origin, "http://localhost:5173");
    }

    #[test]
    #[serial]
    fn test_api_port_takes_precedence_over_legacy_port() {
        clear();
        env::set_var(constants::PORT, "5000");
        env::set_var(constants::SPLITLAB_API_PORT, "6000");

        let config = Config::from_env();
        clear();

        assert_eq!(config.unwrap().port, 6000);
    }

    #[test]
    #[serial]
    fn test_rejects_invalid_values() {
        clear();
        env::set_var(constants::SPLITLAB_API_PORT, "0");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::PortOutOfRange(0))
        ));

        env::set_var(constants::SPLITLAB_API_PORT, "abc");
        assert!(matches!(Config::from_env(), Err(ConfigError::InvalidPort(_))));

        clear();
        env::set_var(constants::SPLITLAB_API_HOST, "not-an-ip");
        assert!(matches!(Config::from_env(), Err(ConfigError::InvalidHost(_))));

        clear();
        env::set_var(constants::SPLITLAB_CORS_ORIGIN, "localhost:3000");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidCorsOrigin(_))
        ));
        clear();
    }
}
