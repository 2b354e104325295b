//! Configuration
//!
//! A [`ConduitConfig`] is read from a JSON, TOML or YAML file and then
//! overridden from `CONDUIT_*` environment variables. Every threshold the
//! runtime uses (timeouts, retry counts, debounce window, restart ceiling)
//! lives here rather than in the code.

mod connection;
pub mod env_loader;
pub mod file_loader;
pub mod validation;

pub use connection::{Auth, Capability, ConnectionConfig, TransportKind};

use crate::error::ConduitResult;
use crate::logwatch::Severity;
use crate::protocol::methods;
use crate::supervisor::{RestartPolicy, SupervisorSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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
            format: "pretty".to_string(),
        }
    }
}

/// Timing of connection attempts, requests and health checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub request_timeout_secs: u64,
    /// Connect attempts before a connection is marked as failed
    pub connect_attempts: u32,
    pub connect_retry_delay_ms: u64,
    pub health_interval_secs: u64,
    pub ping_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_attempts: 3,
            connect_retry_delay_ms: 500,
            health_interval_secs: 30,
            ping_timeout_secs: 5,
        }
    }
}

impl RuntimeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }
}

/// Automatic restart settings for supervised processes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    pub enabled: bool,
    pub max_restarts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        let policy = RestartPolicy::default();
        Self {
            enabled: policy.enabled,
            max_restarts: policy.max_restarts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            multiplier: policy.multiplier,
        }
    }
}

impl RestartConfig {
    pub fn to_policy(&self) -> RestartPolicy {
        RestartPolicy {
            enabled: self.enabled,
            max_restarts: self.max_restarts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
        }
    }
}

/// Process supervisor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Seconds between SIGTERM and SIGKILL
    pub graceful_timeout_secs: u64,
    pub restart: RestartConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            graceful_timeout_secs: 5,
            restart: RestartConfig::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            graceful_timeout: Duration::from_secs(self.graceful_timeout_secs),
        }
    }
}

/// Log watcher settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Log file to tail
    pub path: PathBuf,
    pub poll_interval_ms: u64,
    /// Window in which a repeated error is suppressed
    pub debounce_secs: u64,
    /// Lines kept per captured block, first line included
    pub max_block_lines: usize,
    /// Skip the existing content of the file on startup
    pub start_at_end: bool,
    /// Events buffered between the watcher and its consumer
    pub channel_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            poll_interval_ms: 500,
            debounce_secs: 60,
            max_block_lines: 50,
            start_at_end: true,
            channel_capacity: 256,
        }
    }
}

impl WatcherConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }
}

/// Notification forwarder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Connection names receiving error notifications
    pub targets: Vec<String>,
    /// Events below this severity are dropped
    pub min_severity: Severity,
    /// Notification method used on the wire
    pub method: String,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            min_severity: Severity::Error,
            method: methods::LOG_MESSAGE.to_string(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConduitConfig {
    pub logging: LoggingConfig,
    pub runtime: RuntimeConfig,
    pub supervisor: SupervisorConfig,
    pub connections: Vec<ConnectionConfig>,
    pub watcher: Option<WatcherConfig>,
    pub forwarder: ForwarderConfig,
}

impl ConduitConfig {
    /// Load from `path` (if given), apply environment overrides and validate
    ///
    /// Validation warnings are logged; hard violations are returned as errors.
    pub fn load(path: Option<&Path>) -> ConduitResult<Self> {
        let config = Self::read(path)?;
        for warning in config.validate()? {
            warn!("{}", warning);
        }
        Ok(config)
    }

    /// Load from `path` (if given) and apply environment overrides, unvalidated
    pub fn read(path: Option<&Path>) -> ConduitResult<Self> {
        let mut config = match path {
            Some(path) => file_loader::load_from_file(path)?,
            None => Self::default(),
        };
        env_loader::apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Check the configuration, returning non-fatal warnings
    pub fn validate(&self) -> ConduitResult<Vec<String>> {
        validation::ConfigValidator::validate(self)
    }

    /// Look up a connection by name
    pub fn connection(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections.iter().find(|c| c.name == name)
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connections.push(connection);
        self
    }
}
