//! Configuration for a KeyMesh node.
//!
//! TOML-based configuration file loading and saving. The default path is
//! `~/.config/keymesh/config.toml`. A node whose own listener equals the
//! configured root endpoint acts as the directory root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine;
use crate::transport::Endpoint;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("node name must not be empty")]
    EmptyName,

    #[error("node name must not contain whitespace, got {0:?}")]
    InvalidName(String),

    #[error("listen host must not be empty")]
    EmptyHost,

    #[error(
        "key_size must be between {min} and {max}, got {0}",
        min = engine::MIN_KEY_SIZE,
        max = engine::MAX_KEY_SIZE
    )]
    InvalidKeySize(usize),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Identity and logging.
    pub node: NodeConfig,

    /// This node's own listener.
    pub listen: ListenConfig,

    /// The directory root every node registers with.
    pub root: RootConfig,

    /// Key-establishment parameters.
    pub handshake: HandshakeConfig,
}

/// Identity and logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    /// Identifier this node registers and signs under.
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListenConfig {
    /// Address to bind.
    pub host: String,

    /// Port to bind.
    pub port: u16,
}

/// Directory root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RootConfig {
    /// Root's address.
    pub host: String,

    /// Root's port.
    pub port: u16,
}

/// Key-establishment configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Raw key material drawn per handshake, in bytes.
    pub key_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "node".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8001,
        }
    }
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8001,
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            key_size: engine::DEFAULT_KEY_SIZE,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keymesh")
        .join("config.toml")
}

impl Config {
    /// This node's own listener endpoint.
    pub fn listen_endpoint(&self) -> Endpoint {
        Endpoint::new(self.listen.host.clone(), self.listen.port)
    }

    /// The configured root endpoint.
    pub fn root_endpoint(&self) -> Endpoint {
        Endpoint::new(self.root.host.clone(), self.root.port)
    }

    /// Whether this node is itself the directory root.
    pub fn is_root(&self) -> bool {
        self.listen_endpoint() == self.root_endpoint()
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - KEYMESH_NAME: Override the node identifier
    /// - KEYMESH_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("KEYMESH_NAME") {
            if !name.is_empty() {
                tracing::info!("Overriding node name from environment: {}", name);
                self.node.name = name;
            }
        }

        if let Ok(level) = std::env::var("KEYMESH_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.node.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.node.name.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidName(self.node.name.clone()));
        }

        if self.listen.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }

        if !(engine::MIN_KEY_SIZE..=engine::MAX_KEY_SIZE).contains(&self.handshake.key_size) {
            return Err(ConfigError::InvalidKeySize(self.handshake.key_size));
        }

        let level = self.node.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.node.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
