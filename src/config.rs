//! # Configuration Management
//!
//! Structured configuration for a mesh node: identity and listener, transport limits,
//! heartbeat cadence, handshake and discovery budgets, and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - TOML strings via `from_toml()`
//! - Environment variables via `from_env()`
//! - Direct instantiation with defaults
//!
//! ## Environment Variables
//! - `NETMESH_NODE_ID`: this node's id (0-255)
//! - `NETMESH_LISTEN_ADDRESS`: listener socket address
//! - `NETMESH_HEARTBEAT_INTERVAL_MS`: pause between liveness probes
//! - `NETMESH_DEFAULT_TTL`: hop budget of originated packets
//!
//! Durations are written as integer milliseconds.

use crate::core::packet::{NodeId, DEFAULT_TTL};
use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Listener port used when none is configured
pub const DEFAULT_PORT: u16 = 420;

/// Main node configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NodeConfig {
    /// Identity and listener
    #[serde(default)]
    pub node: NodeSettings,

    /// Packet and socket limits
    #[serde(default)]
    pub transport: TransportConfig,

    /// Liveness probing
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Inbound identification and outbound discovery
    #[serde(default)]
    pub handshake: HandshakeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `NETMESH_*` environment overrides to this configuration
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(id) = std::env::var("NETMESH_NODE_ID") {
            let id = id.parse::<NodeId>().map_err(|_| {
                ProtocolError::ConfigError(format!("NETMESH_NODE_ID is not a node id: '{id}'"))
            })?;
            self.node.id = Some(id);
        }

        if let Ok(addr) = std::env::var("NETMESH_LISTEN_ADDRESS") {
            self.node.listen_address = addr.parse().map_err(|_| {
                ProtocolError::ConfigError(format!(
                    "NETMESH_LISTEN_ADDRESS is not a socket address: '{addr}'"
                ))
            })?;
        }

        if let Ok(interval) = std::env::var("NETMESH_HEARTBEAT_INTERVAL_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                self.heartbeat.interval = Duration::from_millis(val);
            }
        }

        if let Ok(ttl) = std::env::var("NETMESH_DEFAULT_TTL") {
            if let Ok(val) = ttl.parse::<u8>() {
                self.transport.default_ttl = val;
            }
        }

        Ok(())
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.node.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.heartbeat.validate());
        errors.extend(self.handshake.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Node identity and listener
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Explicit node id; derived from the listen address when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,

    /// Listener address (e.g., "0.0.0.0:420")
    pub listen_address: SocketAddr,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            id: None,
            listen_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
        }
    }
}

impl NodeSettings {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.id.is_none() {
            let derivable = match self.listen_address {
                SocketAddr::V4(v4) => !v4.ip().is_unspecified(),
                SocketAddr::V6(_) => false,
            };
            if !derivable {
                errors.push(format!(
                    "Node id must be set when listening on '{}' (id derives from a concrete IPv4 address)",
                    self.listen_address
                ));
            }
        }

        errors
    }
}

/// Packet and socket limits
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Hop budget stamped on packets this node originates
    pub default_ttl: u8,

    /// Timeout for outbound dials
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Timeout for a single framed write
    #[serde(with = "duration_serde")]
    pub send_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            connect_timeout: timeout::CONNECT_TIMEOUT,
            send_timeout: timeout::SEND_TIMEOUT,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.default_ttl < 2 {
            errors.push(format!(
                "Default TTL too small: {} (minimum: 2, one hop is spent on the first link)",
                self.default_ttl
            ));
        }

        if self.connect_timeout.as_millis() < 10 {
            errors.push("Connect timeout too short (minimum: 10ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("Connect timeout too long (maximum: 300s)".to_string());
        }

        if self.send_timeout.as_millis() < 10 {
            errors.push("Send timeout too short (minimum: 10ms)".to_string());
        } else if self.send_timeout.as_secs() > 300 {
            errors.push("Send timeout too long (maximum: 300s)".to_string());
        }

        errors
    }
}

/// Liveness probing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Whether active connections run a heartbeat monitor
    pub enabled: bool,

    /// Pause between probe cycles
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Wait between reply checks
    #[serde(with = "duration_serde")]
    pub tick: Duration,

    /// Reply checks before the link is declared dead
    pub max_attempts: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: timeout::HEARTBEAT_INTERVAL,
            tick: timeout::HEARTBEAT_TICK,
            max_attempts: 5,
        }
    }
}

impl HeartbeatConfig {
    /// Longest time a dead peer can go unnoticed
    pub fn detection_window(&self) -> Duration {
        self.interval + self.tick * self.max_attempts
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.interval.as_millis() < 10 {
            errors.push("Heartbeat interval too short (minimum: 10ms)".to_string());
        } else if self.interval.as_secs() > 3600 {
            errors.push("Heartbeat interval too long (maximum: 1 hour)".to_string());
        }

        if self.tick.is_zero() {
            errors.push("Heartbeat tick cannot be 0".to_string());
        }

        if self.max_attempts == 0 {
            errors.push("Heartbeat max attempts must be greater than 0".to_string());
        } else if self.max_attempts > 100 {
            errors.push(format!(
                "Heartbeat max attempts too large: {} (maximum: 100)",
                self.max_attempts
            ));
        }

        errors
    }
}

/// Inbound identification and outbound discovery budgets
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Packets read while waiting for a peer to identify
    pub attempts: u32,

    /// Wait per identification attempt
    #[serde(with = "duration_serde")]
    pub attempt_timeout: Duration,

    /// Dial attempts per discovery candidate
    pub connect_attempts: u32,

    /// Pause between discovery dials
    #[serde(with = "duration_serde")]
    pub retry_delay: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            attempt_timeout: timeout::HANDSHAKE_ATTEMPT_TIMEOUT,
            connect_attempts: 3,
            retry_delay: timeout::DISCOVERY_RETRY_DELAY,
        }
    }
}

impl HandshakeConfig {
    /// Upper bound on a full inbound handshake
    pub fn budget(&self) -> Duration {
        self.attempt_timeout * self.attempts
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.attempts == 0 {
            errors.push("Handshake attempts must be greater than 0".to_string());
        }

        if self.attempt_timeout.as_millis() < 10 {
            errors.push("Handshake attempt timeout too short (minimum: 10ms)".to_string());
        }

        if self.connect_attempts == 0 {
            errors.push("Discovery connect attempts must be greater than 0".to_string());
        }

        if self.retry_delay.as_secs() > 60 {
            errors.push("Discovery retry delay too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("netmesh"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        level.as_str().to_ascii_lowercase().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.node.listen_address.port(), DEFAULT_PORT);
        assert_eq!(config.transport.default_ttl, 16);
        assert_eq!(config.heartbeat.max_attempts, 5);
        assert_eq!(config.handshake.attempts, 10);
    }

    #[test]
    fn test_unspecified_listener_needs_id() {
        let config = NodeConfig::default();
        assert_eq!(config.validate().len(), 1);

        let config = NodeConfig::default_with_overrides(|c| c.node.id = Some(4));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_example_config_parses_back() {
        let text = NodeConfig::example_config();
        let parsed = NodeConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.heartbeat.interval, Duration::from_millis(1000));
        assert_eq!(parsed.logging.log_level, Level::INFO);
    }
}
