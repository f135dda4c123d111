//! Configuration module for the WebSocket server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::protocols::websocket::MAX_PAYLOAD_LEN_16;

/// Connection runtime backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Readiness-based event loop (epoll/kqueue)
    Mio,
    /// Single-threaded tokio runtime
    Tokio,
}

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "rawsocket-ws")]
#[command(author = "rawsocket-ws authors")]
#[command(version = "0.1.0")]
#[command(about = "A WebSocket echo server on raw TCP sockets", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:1337)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Runtime backend
    #[arg(short = 'r', long, value_enum)]
    pub runtime: Option<RuntimeType>,

    /// Number of mio worker threads (0 = number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum concurrent connections (per worker for mio)
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Largest accepted frame payload in bytes (at most 65535)
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Close connections idle for this many seconds (0 = never)
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Runtime backend
    #[serde(default = "default_runtime")]
    pub runtime: RuntimeType,
    /// Number of mio worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            runtime: default_runtime(),
            workers: default_workers(),
            max_connections: default_max_connections(),
        }
    }
}

/// Frame handling limits
#[derive(Debug, Deserialize)]
pub struct WebSocketConfig {
    /// Largest accepted frame payload in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Idle timeout in seconds (0 = never)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:1337".to_string()
}

fn default_runtime() -> RuntimeType {
    RuntimeType::Mio
}

fn default_workers() -> usize {
    1
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_frame_size() -> usize {
    MAX_PAYLOAD_LEN_16
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub runtime: RuntimeType,
    pub workers: usize,
    pub max_connections: usize,
    pub max_frame_size: usize,
    pub idle_timeout: Option<Duration>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point to, if any.
    pub fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        // Merge CLI args with TOML config (CLI takes precedence)
        let config = Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            runtime: cli.runtime.unwrap_or(toml_config.server.runtime),
            workers: cli.workers.unwrap_or(toml_config.server.workers),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            max_frame_size: cli
                .max_frame_size
                .unwrap_or(toml_config.websocket.max_frame_size),
            idle_timeout: match cli.idle_timeout.unwrap_or(toml_config.websocket.idle_timeout) {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_size > MAX_PAYLOAD_LEN_16 {
            return Err(ConfigError::Invalid(format!(
                "max_frame_size must be at most {MAX_PAYLOAD_LEN_16}, got {}",
                self.max_frame_size
            )));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
