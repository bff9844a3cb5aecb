//! # Configuration Management
//!
//! Centralized configuration for transports, storage blobs, the TCP server and
//! client, and logging.
//!
//! ## Configuration Sources
//! - TOML strings and files via [`WireConfig::from_toml`] / [`WireConfig::from_file`]
//! - Environment variables prefixed with `WIREKIT_` via [`WireConfig::from_env`]
//! - Direct instantiation with defaults
//!
//! Durations are written as milliseconds in TOML.
//!
//! ```toml
//! [transport]
//! max_frame_size = 1048576
//! compression = "zstd"
//! compression_level = 3
//!
//! [storage]
//! compression = "lz4"
//!
//! [server]
//! address = "127.0.0.1:7400"
//! max_connections = 64
//! shutdown_timeout = 5000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

use crate::core::formatter::{CompressionFormatter, Formatter};
use crate::error::{ProtocolError, Result};
use crate::utils::compression::{CompressionKind, DEFAULT_ZSTD_LEVEL};

/// Largest frame body accepted by default (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Deepest container/list nesting accepted when a storage blob is loaded
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// Default TCP address for servers and clients
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:7400";

const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Prefix of every environment variable read by [`WireConfig::from_env`]
pub const ENV_PREFIX: &str = "WIREKIT_";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct WireConfig {
    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl WireConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by `WIREKIT_*` environment variables.
    ///
    /// Unparseable values are reported rather than ignored.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary lookup, keyed by
    /// the variable name without its prefix.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("SERVER_ADDRESS") {
            config.server.address = addr;
        }
        if let Some(addr) = lookup("CLIENT_ADDRESS") {
            config.client.address = addr;
        }
        if let Some(value) = lookup("MAX_CONNECTIONS") {
            config.server.max_connections = parse_var("MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = lookup("CONNECTION_TIMEOUT_MS") {
            config.client.connection_timeout =
                Duration::from_millis(parse_var("CONNECTION_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("MAX_FRAME_SIZE") {
            config.transport.max_frame_size = parse_var("MAX_FRAME_SIZE", &value)?;
        }
        if let Some(value) = lookup("COMPRESSION") {
            config.transport.compression = parse_var("COMPRESSION", &value)?;
        }
        if let Some(value) = lookup("STORAGE_COMPRESSION") {
            config.storage.compression = parse_var("STORAGE_COMPRESSION", &value)?;
        }
        if let Some(value) = lookup("STORAGE_MAX_DEPTH") {
            config.storage.max_depth = parse_var("STORAGE_MAX_DEPTH", &value)?;
        }
        if let Some(value) = lookup("LOG_LEVEL") {
            config.logging.log_level = value
                .parse::<Level>()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid {ENV_PREFIX}LOG_LEVEL: {value}")))?;
        }
        if let Some(value) = lookup("LOG_JSON") {
            config.logging.json_format = parse_var("LOG_JSON", &value)?;
        }

        Ok(config)
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))
    }

    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.transport.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
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

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ProtocolError::ConfigError(format!("Invalid {ENV_PREFIX}{name}: {value}")))
}

/// Compression applied by a configured formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    #[default]
    None,
    Lz4,
    Zstd,
}

impl CompressionMode {
    pub fn kind(self) -> Option<CompressionKind> {
        match self {
            CompressionMode::None => None,
            CompressionMode::Lz4 => Some(CompressionKind::Lz4),
            CompressionMode::Zstd => Some(CompressionKind::Zstd),
        }
    }
}

impl std::str::FromStr for CompressionMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionMode::None),
            "lz4" => Ok(CompressionMode::Lz4),
            "zstd" => Ok(CompressionMode::Zstd),
            other => Err(ProtocolError::ConfigError(format!("Unknown compression: {other}"))),
        }
    }
}

fn compression_formatter(mode: CompressionMode, level: i32) -> Option<Arc<dyn Formatter>> {
    mode.kind().map(|kind| {
        Arc::new(CompressionFormatter::new(kind).with_level(level)) as Arc<dyn Formatter>
    })
}

fn validate_level(mode: CompressionMode, level: i32, section: &str, errors: &mut Vec<String>) {
    if mode == CompressionMode::Zstd && !(1..=22).contains(&level) {
        errors.push(format!(
            "Invalid {section} compression level: {level} (valid range: 1-22)"
        ));
    }
}

/// Framing and connection-wide formatting
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest frame body accepted; longer declared lengths are rejected before allocation
    pub max_frame_size: usize,

    /// Compression applied to every frame body
    pub compression: CompressionMode,

    /// Zstd level (ignored by LZ4)
    pub compression_level: i32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            compression: CompressionMode::None,
            compression_level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

impl TransportConfig {
    /// Connection-wide formatter, `None` when compression is off.
    pub fn formatter(&self) -> Option<Arc<dyn Formatter>> {
        compression_formatter(self.compression, self.compression_level)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_size < 64 {
            errors.push("Max frame size too small (minimum: 64 bytes)".to_string());
        } else if self.max_frame_size > u32::MAX as usize {
            errors.push(format!(
                "Max frame size too large: {} bytes (must fit a 4-byte length)",
                self.max_frame_size
            ));
        }

        validate_level(self.compression, self.compression_level, "transport", &mut errors);
        errors
    }
}

/// Whole-blob formatting for storage trees
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub compression: CompressionMode,

    pub compression_level: i32,

    /// Largest blob body accepted on load
    pub max_blob_size: usize,

    /// Deepest nesting accepted on load
    pub max_depth: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            compression: CompressionMode::None,
            compression_level: DEFAULT_ZSTD_LEVEL,
            max_blob_size: MAX_FRAME_SIZE,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl StorageConfig {
    pub fn formatter(&self) -> Option<Arc<dyn Formatter>> {
        compression_formatter(self.compression, self.compression_level)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_blob_size == 0 {
            errors.push("Max blob size cannot be 0".to_string());
        } else if self.max_blob_size > u32::MAX as usize {
            errors.push("Max blob size must fit a 4-byte length".to_string());
        }
        if self.max_depth == 0 {
            errors.push("Max storage depth cannot be 0".to_string());
        }
        validate_level(self.compression, self.compression_level, "storage", &mut errors);
        errors
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g., "127.0.0.1:7400")
    pub address: String,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// How long `serve` waits for connection tasks after shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from(DEFAULT_ADDRESS),
            max_connections: 1000,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:7400')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        }

        if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Target server address
    pub address: String,

    /// Timeout for connection attempts
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from(DEFAULT_ADDRESS),
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        }

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        } else if self.connection_timeout.as_secs() > 300 {
            errors.push("Connection timeout too long (maximum: 300s)".to_string());
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

    /// Level used when `RUST_LOG` is not set
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("wirekit"),
            log_level: Level::INFO,
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

        errors
    }
}

/// Durations as milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&level.as_str().to_ascii_lowercase())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level = String::deserialize(deserializer)?;
        Level::from_str(&level)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level}")))
    }
}
