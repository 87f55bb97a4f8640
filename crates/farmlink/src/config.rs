//! Configuration loading: YAML file, then environment overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration for the farmlink process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub relay: RelayConfig,
    pub broker: BrokerConfig,
    pub telemetry: TelemetryConfig,
    pub camera: CameraConfig,
}

/// Retry schedule parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_secs: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    pub max_secs: u64,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_multiplier() -> u32 {
    2
}

/// Camera stream relay settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// WebSocket address of the camera bridge
    pub url: String,
    pub ping_interval_secs: u64,
    /// Connection is considered lost after this long without hearing from the peer
    pub ping_timeout_secs: u64,
    /// A receive that takes longer than this is "no data this cycle"
    pub recv_timeout_secs: u64,
    pub buffer_capacity: usize,
    pub backoff: BackoffConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8765".to_string(),
            ping_interval_secs: 10,
            ping_timeout_secs: 20,
            recv_timeout_secs: 10,
            buffer_capacity: 10,
            backoff: BackoffConfig {
                initial_secs: 1,
                multiplier: 2,
                max_secs: 30,
                max_attempts: None,
            },
        }
    }
}

/// Command broker (MQTT) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Defaults to `dashboard-<uuid>` when unset
    pub client_id: Option<String>,
    pub tls: bool,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    /// Device id used in topic paths
    pub device: String,
    pub reconnect: BackoffConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8883,
            username: String::new(),
            password: String::new(),
            client_id: None,
            tls: true,
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
            device: "sawah1".to_string(),
            reconnect: BackoffConfig {
                initial_secs: 1,
                multiplier: 2,
                max_secs: 60,
                max_attempts: Some(12),
            },
        }
    }
}

impl BrokerConfig {
    /// Reject settings that can never produce a working connection.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.host.trim().is_empty() {
            missing.push("host");
        }
        if self.username.is_empty() {
            missing.push("username");
        }
        if self.password.is_empty() {
            missing.push("password");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "broker {} not set",
                missing.join(", ")
            )));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("broker port must be non-zero".into()));
        }
        if self.device.is_empty() || self.device.contains(['/', '+', '#']) {
            return Err(ConfigError::Invalid(format!(
                "invalid broker device id '{}'",
                self.device
            )));
        }
        Ok(())
    }
}

/// Telemetry mirror (Ubidots) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub token: Option<String>,
    pub device_label: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            token: None,
            device_label: None,
            base_url: "https://industrial.api.ubidots.com/api/v1.6/devices".to_string(),
            timeout_secs: 10,
        }
    }
}

impl TelemetryConfig {
    /// Mirror is active only with both a token and a device label.
    pub fn is_enabled(&self) -> bool {
        matches!((&self.token, &self.device_label), (Some(t), Some(d)) if !t.is_empty() && !d.is_empty())
    }
}

/// Camera HTTP control settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub address: Option<String>,
    pub timeout_secs: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            address: None,
            timeout_secs: 5,
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Resolve the config for this process.
    ///
    /// An explicit path must exist. Without one, `~/.farmlink/config.yaml` is
    /// used when present, otherwise defaults. Environment overrides apply last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => {
                    log::info!("Loading config from {}", path.display());
                    Self::from_file(&path)?
                }
                _ => {
                    log::info!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("BROKER") {
            self.broker.host = host;
        }
        if let Some(port) = lookup("BROKER_PORT") {
            self.broker.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("BROKER_PORT '{}' is not a port", port)))?;
        }
        if let Some(username) = lookup("BROKER_USERNAME") {
            self.broker.username = username;
        }
        if let Some(password) = lookup("BROKER_PASSWORD") {
            self.broker.password = password;
        }
        if let Some(label) = lookup("UBIDOTS_DEVICE_ID") {
            self.telemetry.device_label = Some(label);
        }
        if let Some(token) = lookup("UBIDOTS_TOKEN") {
            self.telemetry.token = Some(token);
        }
        if let Some(url) = lookup("CAMERA_STREAM_URL") {
            self.relay.url = url;
        }
        if let Some(ip) = lookup("CAMERA_IP") {
            self.camera.address = Some(ip);
        }
        Ok(())
    }
}

/// `~/.farmlink/config.yaml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".farmlink").join("config.yaml"))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}
