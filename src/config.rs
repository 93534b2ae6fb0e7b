//! # Configuration Management
//!
//! Centralized configuration for the envelope client.
//!
//! This module provides structured configuration for the connection target,
//! frame limits, trust roots and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! ## Security Considerations
//! - The default frame limit (16 MB) bounds per-frame allocations on the read path
//! - Peers are always verified against the platform trust store and any extra
//!   roots configured here; there is no way to disable verification

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Max allowed frame body size (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Default time allowed for DNS, TCP connect and TLS handshake combined
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of read buffers kept warm by the frame reader
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 16;

/// Buffers that grew above this size are released instead of pooled
pub const DEFAULT_MAX_POOLED_BUFFER_SIZE: usize = 64 * 1024;

/// Top-level settings consumed by [`Client`](crate::client::Client)
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ClientSettings {
    /// Connection target
    #[serde(default)]
    pub client: ClientConfig,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ClientSettings {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ClientError::Config(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ClientError::Config(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ClientError::Config(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("ENVELOPE_RPC_HOST") {
            config.client.host = host;
        }

        if let Ok(port) = std::env::var("ENVELOPE_RPC_PORT") {
            config.client.port = port
                .parse::<u16>()
                .map_err(|e| ClientError::Config(format!("Invalid ENVELOPE_RPC_PORT: {e}")))?;
        }

        if let Ok(timeout) = std::env::var("ENVELOPE_RPC_CONNECT_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.client.connect_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(size) = std::env::var("ENVELOPE_RPC_MAX_FRAME_SIZE") {
            if let Ok(val) = size.parse::<usize>() {
                config.transport.max_frame_size = val;
            }
        }

        if let Ok(path) = std::env::var("ENVELOPE_RPC_CA_FILE") {
            config.transport.ca_file = Some(path);
        }

        Ok(config)
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
            .map_err(|e| ClientError::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ClientError::Config(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ClientError::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Connection target
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Host name; also the name the server certificate is validated against
    pub host: String,

    /// TCP port
    pub port: u16,

    /// Upper bound on DNS + TCP connect + TLS handshake
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: 5035,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.host.is_empty() {
            errors.push("Host cannot be empty".to_string());
        } else if self.host.contains(char::is_whitespace) {
            errors.push(format!("Invalid host: '{}' contains whitespace", self.host));
        }

        if self.port == 0 {
            errors.push("Port must be greater than 0".to_string());
        }

        if self.connect_timeout.is_zero() {
            errors.push("Connect timeout must be greater than 0".to_string());
        } else if self.connect_timeout > Duration::from_secs(300) {
            errors.push(format!(
                "Connect timeout too long: {:?} (maximum recommended: 5 minutes)",
                self.connect_timeout
            ));
        }

        errors
    }
}

/// Framing and TLS trust configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Largest frame body accepted or produced
    pub max_frame_size: usize,

    /// Number of pre-allocated read buffers
    pub buffer_pool_size: usize,

    /// Read buffers above this capacity are not returned to the pool
    pub max_pooled_buffer_size: usize,

    /// Trust the platform's native root certificates
    pub native_roots: bool,

    /// Optional PEM bundle of additional trusted roots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            buffer_pool_size: DEFAULT_BUFFER_POOL_SIZE,
            max_pooled_buffer_size: DEFAULT_MAX_POOLED_BUFFER_SIZE,
            native_roots: true,
            ca_file: None,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_size == 0 {
            errors.push("Max frame size cannot be 0".to_string());
        } else if self.max_frame_size > u32::MAX as usize {
            errors.push(format!(
                "Max frame size too large: {} bytes (a 4-byte length prefix allows at most {})",
                self.max_frame_size,
                u32::MAX
            ));
        }

        if self.max_pooled_buffer_size > self.max_frame_size {
            errors.push("Max pooled buffer size cannot exceed max frame size".to_string());
        }

        if self.buffer_pool_size > 4096 {
            errors.push(format!(
                "Buffer pool size too large: {} (maximum: 4096)",
                self.buffer_pool_size
            ));
        }

        if let Some(ref path) = self.ca_file {
            if !Path::new(path).exists() {
                errors.push(format!("CA file does not exist: {path}"));
            }
        } else if !self.native_roots {
            errors.push(
                "No trust roots configured: enable native_roots or provide ca_file".to_string(),
            );
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("envelope-rpc"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
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
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
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
