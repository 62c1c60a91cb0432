// Configuration File Support
//
// This module provides configuration file parsing for the Nexus client.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from XDG config directory: ~/.config/nexus/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Nexus API server endpoint
    pub server: ServerConfig,

    /// Session lifecycle and retry behavior
    pub session: SessionConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Server endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the Nexus API server (http or https)
    pub base_url: String,

    /// Path of the push channel, relative to the base URL
    pub ws_path: String,

    /// Timeout in seconds for each HTTP request
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3001".to_string(),
            ws_path: "/ws".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Connect as soon as the session is started
    pub auto_connect: bool,

    /// Automatic reconnect attempts after a failed connect
    pub retry_attempts: u32,

    /// Fixed delay between reconnect attempts, in milliseconds
    pub retry_delay_ms: u64,

    /// Drop every push subscription on explicit disconnect
    pub clear_subscriptions_on_disconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_connect: true,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            clear_subscriptions_on_disconnect: false,
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation. A missing file yields the defaults (with
    /// environment overrides applied).
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;

            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/nexus/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "nexus", "nexus") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            // Fallback if XDG dirs cannot be determined
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("nexus").join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - NEXUS_LOG_LEVEL
    /// - NEXUS_LOG_FORMAT
    /// - NEXUS_SERVER_URL
    /// - NEXUS_AUTO_CONNECT
    /// - NEXUS_RETRY_ATTEMPTS
    /// - NEXUS_RETRY_DELAY_MS
    fn apply_env_overrides(mut self) -> Self {
        // Logging overrides
        if let Ok(level) = std::env::var("NEXUS_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("NEXUS_LOG_FORMAT") {
            self.logging.format = format;
        }

        // Server overrides
        if let Ok(url) = std::env::var("NEXUS_SERVER_URL") {
            self.server.base_url = url;
        }

        // Session overrides
        if let Some(auto) = env_parse::<bool>("NEXUS_AUTO_CONNECT") {
            self.session.auto_connect = auto;
        }
        if let Some(attempts) = env_parse::<u32>("NEXUS_RETRY_ATTEMPTS") {
            self.session.retry_attempts = attempts;
        }
        if let Some(delay) = env_parse::<u64>("NEXUS_RETRY_DELAY_MS") {
            self.session.retry_delay_ms = delay;
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}. Must be one of: trace, debug, info, warn, error", self.logging.level),
        }

        // Validate logging format
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!("Invalid log format: {}. Must be one of: json, pretty, compact", self.logging.format),
        }

        // Validate server configuration
        let url = url::Url::parse(&self.server.base_url)
            .with_context(|| format!("Invalid server URL: {}", self.server.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Server URL must use http or https, got: {}", url.scheme());
        }
        if !self.server.ws_path.starts_with('/') {
            anyhow::bail!("WebSocket path must start with '/': {}", self.server.ws_path);
        }
        if self.server.request_timeout_secs == 0 {
            anyhow::bail!("Request timeout must be > 0");
        }

        Ok(())
    }
}

/// Read and parse `key`; an unparseable value is logged and ignored
fn env_parse<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "Ignoring unparseable environment override");
            None
        }
    }
}
