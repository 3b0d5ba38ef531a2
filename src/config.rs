//! Configuration for the VR movement notifier.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the notification server host.
pub const ENV_SOCKET_IP: &str = "VR_NOTIFIER_SOCKET_IP";

/// Environment variable overriding the notification server port.
pub const ENV_SOCKET_PORT: &str = "VR_NOTIFIER_SOCKET_PORT";

/// Main configuration for the notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Notification server endpoint
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Start sessions in audit mode (nothing is transmitted)
    #[serde(default)]
    pub audit_only: bool,

    /// Default tracing filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            audit_only: false,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vr-movement-notifier")
            .join("config.json")
    }

    /// Apply `VR_NOTIFIER_SOCKET_IP` / `VR_NOTIFIER_SOCKET_PORT` if set.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        let host = std::env::var(ENV_SOCKET_IP).ok();
        let port = std::env::var(ENV_SOCKET_PORT).ok();
        self.apply_overrides(host.as_deref(), port.as_deref())
    }

    /// Override the endpoint host and/or port. Blank values are ignored.
    pub fn apply_overrides(
        &mut self,
        host: Option<&str>,
        port: Option<&str>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = host.map(str::trim).filter(|h| !h.is_empty()) {
            self.endpoint.host = host.to_string();
        }
        if let Some(port) = port.map(str::trim).filter(|p| !p.is_empty()) {
            self.endpoint.port = parse_port(port)?;
        }
        Ok(())
    }
}

/// Host and port of the notification server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub host: String,
    #[serde(with = "port_serde")]
    pub port: u16,
}

impl EndpointConfig {
    /// Create a new endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// WebSocket URL for this endpoint.
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5006,
        }
    }
}

impl std::fmt::Display for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parse a port given as text.
pub fn parse_port(s: &str) -> Result<u16, ConfigError> {
    s.trim()
        .parse::<u16>()
        .map_err(|e| ConfigError::InvalidPort(format!("'{}': {e}", s.trim())))
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidPort(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::InvalidPort(e) => write!(f, "Invalid port {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for ports written either as a number or as a string.
mod port_serde {
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPort {
        Number(u64),
        Text(String),
    }

    pub fn serialize<S>(port: &u16, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        port.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u16, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawPort::deserialize(deserializer)? {
            RawPort::Number(n) => u16::try_from(n)
                .map_err(|_| de::Error::custom(format!("port {n} out of range"))),
            RawPort::Text(s) => super::parse_port(&s).map_err(de::Error::custom),
        }
    }
}
