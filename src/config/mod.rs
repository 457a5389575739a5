//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address, derived from PORT (default 3000)
    pub server_addr: SocketAddr,
    /// Root of the JSON entity stores (default ./data)
    pub data_dir: PathBuf,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Deployment mode flag
    pub deployment_mode: DeploymentMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeploymentMode {
    Dev,
    Production,
}

impl FromStr for DeploymentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" | "development" => Ok(Self::Dev),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let port: u16 = match env::var("PORT") {
            Ok(value) => value.parse().map_err(|_| ConfigError::InvalidPort(value))?,
            Err(_) => 3000,
        };

        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let deployment_mode = match env::var("DEPLOYMENT_MODE") {
            Ok(value) => value.parse()?,
            Err(_) => DeploymentMode::Dev,
        };

        Ok(Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            data_dir,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            deployment_mode,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value: {0}")]
    InvalidPort(String),

    #[error("Invalid DEPLOYMENT_MODE: {0}")]
    InvalidMode(String),
}
