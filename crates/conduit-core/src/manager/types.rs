//! Connection manager types

use crate::config::{ConduitConfig, TransportKind};
use crate::rpc::{InitializeResult, RpcError, ServerInfo};
use crate::supervisor::{HealthStatus, ProcessSnapshot, RestartPolicy};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Inactive,
    Connecting,
    Active,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Inactive => "inactive",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Runtime state of a connection
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Handshake result of the current session
    pub server: Option<InitializeResult>,
}

impl ConnectionState {
    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.status = ConnectionStatus::Error;
        self.last_error = Some(message.into());
    }
}

/// Status report for one connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub name: String,
    pub transport: TransportKind,
    pub endpoint: String,
    pub enabled: bool,
    pub status: ConnectionStatus,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub server: Option<ServerInfo>,
    pub server_capabilities: Option<Value>,
    pub requests_ok: u64,
    pub requests_failed: u64,
    pub notifications_sent: u64,
    /// Backing process, for stdio connections that have been started
    pub process: Option<ProcessSnapshot>,
}

/// Result of a connection health check
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionHealth {
    pub name: String,
    pub status: ConnectionStatus,
    pub healthy: bool,
    pub process: Option<HealthStatus>,
    pub ping_latency_ms: Option<u64>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Tunables for connection handling
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub request_timeout: Duration,
    pub connect_attempts: u32,
    pub connect_retry_delay: Duration,
    pub ping_timeout: Duration,
    /// Restart policy given to stdio processes
    pub restart: RestartPolicy,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&ConduitConfig::default())
    }
}

impl ManagerSettings {
    pub fn from_config(config: &ConduitConfig) -> Self {
        Self {
            request_timeout: config.runtime.request_timeout(),
            connect_attempts: config.runtime.connect_attempts,
            connect_retry_delay: config.runtime.connect_retry_delay(),
            ping_timeout: config.runtime.ping_timeout(),
            restart: config.supervisor.restart.to_policy(),
        }
    }

    pub fn with_connect_attempts(mut self, attempts: u32, delay: Duration) -> Self {
        self.connect_attempts = attempts;
        self.connect_retry_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }
}

/// Connection manager errors
#[derive(Debug, Clone, Error)]
pub enum ManagerError {
    #[error("unknown connection '{0}'")]
    NotFound(String),

    #[error("connection '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("connection '{name}' is not active: {reason}")]
    NotActive { name: String, reason: String },

    #[error("connection '{name}': {source}")]
    Rpc {
        name: String,
        #[source]
        source: RpcError,
    },
}

impl ManagerError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "CONNECTION_NOT_FOUND",
            Self::AlreadyRegistered(_) => "CONNECTION_DUPLICATE",
            Self::NotActive { .. } => "CONNECTION_NOT_ACTIVE",
            Self::Rpc { source, .. } => source.error_code(),
        }
    }
}
