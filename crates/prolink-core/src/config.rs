//! Configuration for the prolink stack.
//!
//! Supports:
//! - YAML configuration files
//! - Environment variable overrides (`PROLINK__SECTION__FIELD`)
//! - Per-section validation
//!
//! # Example
//!
//! ```
//! use prolink_core::config::ProlinkConfig;
//!
//! let yaml = r#"
//! discovery:
//!   device_timeout_ms: 2500
//! nfs:
//!   retry:
//!     max_attempts: 3
//! "#;
//!
//! let config = ProlinkConfig::from_yaml(yaml).unwrap();
//! assert_eq!(config.nfs.retry.max_attempts, 3);
//! ```

use crate::constants::{ANNOUNCE_PORT, DEFAULT_VCDJ_ID, REMOTEDB_SERVER_QUERY_PORT, VIRTUAL_CDJ_NAME};
use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProlinkConfig {
    /// Device discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// NFS file fetching settings
    #[serde(default)]
    pub nfs: NfsConfig,

    /// Remote database settings
    #[serde(default)]
    pub remotedb: RemoteDbConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProlinkConfig {
    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration using the `config` crate, layering `PROLINK__*`
    /// environment variables over the given file.
    pub fn from_config_builder<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(
                config::Environment::with_prefix("PROLINK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<()> {
        self.discovery.validate()?;
        self.nfs.validate()?;
        self.remotedb.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Device discovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Local address to bind the announce socket to (all interfaces if unset)
    #[serde(default)]
    pub bind_ip: Option<Ipv4Addr>,

    /// UDP port announcements arrive on
    #[serde(default = "default_announce_port")]
    pub announce_port: u16,

    /// Milliseconds without an announce before a device is dropped
    #[serde(default = "default_device_timeout")]
    pub device_timeout_ms: u64,

    /// Capacity of the lifecycle event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Virtual CDJ announcement settings
    #[serde(default)]
    pub virtual_cdj: VirtualCdjConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bind_ip: None,
            announce_port: default_announce_port(),
            device_timeout_ms: default_device_timeout(),
            event_capacity: default_event_capacity(),
            virtual_cdj: VirtualCdjConfig::default(),
        }
    }
}

impl DiscoveryConfig {
    /// Returns the device timeout as a Duration
    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_timeout_ms == 0 {
            return Err(ConfigError::invalid_value("discovery.device_timeout_ms", "cannot be 0").into());
        }

        if self.event_capacity == 0 {
            return Err(ConfigError::invalid_value("discovery.event_capacity", "cannot be 0").into());
        }

        self.virtual_cdj.validate()
    }
}

/// Identity this process announces when it joins the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualCdjConfig {
    /// Announce the virtual CDJ at all
    #[serde(default)]
    pub enabled: bool,

    /// Name placed in the announce packet
    #[serde(default = "default_vcdj_name")]
    pub name: String,

    /// Device number claimed on the network
    #[serde(default = "default_vcdj_id")]
    pub device_id: u8,

    /// Address announced for this host
    #[serde(default)]
    pub ip: Option<Ipv4Addr>,

    /// Hardware address announced for this host
    #[serde(default)]
    pub mac_addr: [u8; 6],

    /// Broadcast address the keep-alive is sent to
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: Ipv4Addr,

    /// Interval between keep-alive packets
    #[serde(default = "default_announce_interval")]
    pub announce_interval_ms: u64,
}

impl Default for VirtualCdjConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: default_vcdj_name(),
            device_id: default_vcdj_id(),
            ip: None,
            mac_addr: [0; 6],
            broadcast_addr: default_broadcast_addr(),
            announce_interval_ms: default_announce_interval(),
        }
    }
}

impl VirtualCdjConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > 20 {
            return Err(ConfigError::invalid_value(
                "discovery.virtual_cdj.name",
                "must be 1 to 20 bytes",
            )
            .into());
        }

        if self.announce_interval_ms == 0 {
            return Err(ConfigError::invalid_value(
                "discovery.virtual_cdj.announce_interval_ms",
                "cannot be 0",
            )
            .into());
        }

        if self.enabled && self.ip.is_none() {
            return Err(ConfigError::invalid_value(
                "discovery.virtual_cdj.ip",
                "required when the virtual CDJ is enabled",
            )
            .into());
        }

        Ok(())
    }
}

/// Retry policy applied to RPC calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per call, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait for a reply before an attempt is considered lost
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,

    /// Backoff after the first failed attempt
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the backoff
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Exponential growth factor
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            call_timeout_ms: default_call_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Backoff before retry number `attempt` (0 based), capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let backoff_ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_ms = backoff_ms.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped_ms.round() as u64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid_value("retry.max_attempts", "cannot be 0").into());
        }

        if self.call_timeout_ms == 0 {
            return Err(ConfigError::invalid_value("retry.call_timeout_ms", "cannot be 0").into());
        }

        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid_value(
                "retry.backoff_multiplier",
                "must be at least 1.0",
            )
            .into());
        }

        Ok(())
    }
}

/// NFS file fetching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NfsConfig {
    /// Default retry policy for new RPC connections
    #[serde(default)]
    pub retry: RetryConfig,

    /// Bytes requested per NFS READ call
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: u32,
}

impl Default for NfsConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            read_chunk_size: default_read_chunk_size(),
        }
    }
}

impl NfsConfig {
    pub fn validate(&self) -> Result<()> {
        // NFSv2 caps a single READ at 8192 bytes
        if self.read_chunk_size == 0 || self.read_chunk_size > 8192 {
            return Err(ConfigError::invalid_value(
                "nfs.read_chunk_size",
                "must be between 1 and 8192",
            )
            .into());
        }

        self.retry.validate()
    }
}

/// Remote database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDbConfig {
    /// Device number queries are issued on behalf of
    #[serde(default = "default_vcdj_id")]
    pub host_device_id: u8,

    /// TCP port answering database port queries
    #[serde(default = "default_query_port")]
    pub query_port: u16,

    /// TCP connect timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Timeout for a single message read
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// How long `get` waits for an unknown device to appear
    #[serde(default = "default_device_wait")]
    pub device_wait_ms: u64,
}

impl Default for RemoteDbConfig {
    fn default() -> Self {
        Self {
            host_device_id: default_vcdj_id(),
            query_port: default_query_port(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            device_wait_ms: default_device_wait(),
        }
    }
}

impl RemoteDbConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn device_wait(&self) -> Duration {
        Duration::from_millis(self.device_wait_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 || self.read_timeout_ms == 0 {
            return Err(ConfigError::invalid_value("remotedb", "timeouts cannot be 0").into());
        }

        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default = "default_log_format")]
    pub format: LogFormat,

    /// Per-module log levels
    #[serde(default)]
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            module_levels: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Parses the log level string to a tracing Level.
    pub fn parse_level(&self) -> Result<tracing::Level> {
        self.level.parse().map_err(|_| {
            ConfigError::invalid_value("logging.level", format!("Invalid log level: {}", self.level))
                .into()
        })
    }

    /// Builds an `EnvFilter` style directive string, e.g. `info,prolink_nfs=debug`.
    pub fn filter_directive(&self) -> String {
        let mut directive = self.level.clone();
        let mut modules: Vec<_> = self.module_levels.iter().collect();
        modules.sort();
        for (module, level) in modules {
            directive.push_str(&format!(",{}={}", module, level));
        }
        directive
    }

    pub fn validate(&self) -> Result<()> {
        self.parse_level().map(|_| ())
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON format for structured logging
    Json,
}

// Default configuration values
fn default_announce_port() -> u16 {
    ANNOUNCE_PORT
}

fn default_device_timeout() -> u64 {
    10_000
}

fn default_event_capacity() -> usize {
    256
}

fn default_vcdj_name() -> String {
    VIRTUAL_CDJ_NAME.to_string()
}

fn default_vcdj_id() -> u8 {
    DEFAULT_VCDJ_ID
}

fn default_broadcast_addr() -> Ipv4Addr {
    Ipv4Addr::BROADCAST
}

fn default_announce_interval() -> u64 {
    1_500
}

fn default_max_attempts() -> u32 {
    5
}

fn default_call_timeout() -> u64 {
    1_000
}

fn default_initial_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    2_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_read_chunk_size() -> u32 {
    2048
}

fn default_query_port() -> u16 {
    REMOTEDB_SERVER_QUERY_PORT
}

fn default_connect_timeout() -> u64 {
    5_000
}

fn default_read_timeout() -> u64 {
    10_000
}

fn default_device_wait() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}
