//! Configuration module for the metadrop server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the upload server
#[derive(Parser, Debug)]
#[command(name = "metadrop")]
#[command(author = "metadrop authors")]
#[command(version = "0.1.0")]
#[command(about = "A TCP file upload server with integrity digests", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory received files are written to
    #[arg(short = 'd', long)]
    pub storage_dir: Option<PathBuf>,

    /// Stop after this many frames have been processed (default: unbounded)
    #[arg(long)]
    pub max_frames: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Longest the accept loop blocks before checking for shutdown
    #[serde(default = "default_accept_timeout_ms")]
    pub accept_timeout_ms: u64,
    /// Frame budget for the server's lifetime
    pub max_frames: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            accept_timeout_ms: default_accept_timeout_ms(),
            max_frames: None,
        }
    }
}

/// Per-connection transfer tuning
#[derive(Debug, Deserialize)]
pub struct TransferConfig {
    /// Socket read/write timeout while serving a connection
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Receive size for the first chunk of a frame
    #[serde(default = "default_header_chunk_size")]
    pub header_chunk_size: usize,
    /// Upper bound for each payload receive
    #[serde(default = "default_payload_chunk_size")]
    pub payload_chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout_ms(),
            header_chunk_size: default_header_chunk_size(),
            payload_chunk_size: default_payload_chunk_size(),
        }
    }
}

/// Storage-related configuration
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
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

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8005
}

fn default_backlog() -> i32 {
    1
}

fn default_accept_timeout_ms() -> u64 {
    1000
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_header_chunk_size() -> usize {
    2048
}

fn default_payload_chunk_size() -> usize {
    4096
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("received_files")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backlog: i32,
    pub accept_timeout: Duration,
    pub read_timeout: Duration,
    pub header_chunk_size: usize,
    pub payload_chunk_size: usize,
    pub max_frames: Option<u64>,
    pub storage_dir: PathBuf,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::merge(
            CliArgs {
                config: None,
                host: None,
                port: None,
                storage_dir: None,
                max_frames: None,
                log_level: default_log_level(),
            },
            TomlConfig::default(),
        )
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Config::merge(cli, toml_config);
        config.listen_addr()?;
        Ok(config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            backlog: toml_config.server.backlog,
            accept_timeout: Duration::from_millis(toml_config.server.accept_timeout_ms),
            read_timeout: Duration::from_millis(toml_config.transfer.read_timeout_ms),
            header_chunk_size: toml_config.transfer.header_chunk_size,
            payload_chunk_size: toml_config.transfer.payload_chunk_size,
            max_frames: cli.max_frames.or(toml_config.server.max_frames),
            storage_dir: cli.storage_dir.unwrap_or(toml_config.storage.dir),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// Socket address the listener binds to.
    ///
    /// `host` is an IPv4 or IPv6 address; IPv6 may be given with or without
    /// brackets.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let host = self.host.trim();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        host.parse::<IpAddr>()
            .map(|ip| SocketAddr::new(ip, self.port))
            .map_err(|_| ConfigError::InvalidAddress(self.host.clone()))
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {1}", .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {1}", .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid listen address '{0}'")]
    InvalidAddress(String),
}
