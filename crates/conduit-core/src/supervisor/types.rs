//! Types for process supervision

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{ChildStdin, ChildStdout};

/// What to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Program and arguments as one line, for logs
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Automatic restart of processes that exit on their own
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    pub enabled: bool,
    /// Restarts allowed before the process is left dead
    pub max_restarts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_restarts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RestartPolicy {
    /// Policy that never restarts
    pub fn never() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    /// Delay before restart number `attempt` (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = base * self.multiplier.max(1.0).powi(exponent);
        Duration::from_millis(delay_ms.min(self.max_backoff.as_millis() as f64) as u64)
    }
}

/// Lifecycle state of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Starting,
    Running,
    Stopping,
    /// Stopped on request
    Stopped,
    /// Could not be spawned
    Failed,
    /// Exited without being asked to
    Died,
}

impl ProcessState {
    /// Whether a child may currently exist for this state
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
            Self::Died => "DIED",
        };
        f.write_str(label)
    }
}

/// Point-in-time view of one supervised process
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub name: String,
    pub command: String,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub last_exit_code: Option<i32>,
    pub last_error: Option<String>,
}

/// Resource usage sampled from the OS
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProcessMetrics {
    pub cpu_seconds: f64,
    pub memory_bytes: u64,
    pub threads: u32,
}

/// Result of a process health check
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub name: String,
    pub state: ProcessState,
    pub pid: Option<u32>,
    /// The recorded pid still names the process we spawned
    pub alive: bool,
    pub uptime_secs: Option<i64>,
    pub restart_count: u32,
    pub metrics: Option<ProcessMetrics>,
    pub checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.alive && self.state == ProcessState::Running
    }
}

/// Lifecycle notifications published by the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Started { name: String, pid: u32 },
    Exited {
        name: String,
        code: Option<i32>,
        /// Exit followed a stop request
        requested: bool,
    },
    Restarting { name: String, attempt: u32 },
    RestartLimitReached { name: String, restarts: u32 },
}

/// Pipes of a freshly spawned child, handed to exactly one transport
#[derive(Debug)]
pub struct StdioPipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Supervisor errors
#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    #[error("failed to spawn '{name}': {message}")]
    Spawn { name: String, message: String },

    #[error("process '{0}' is already running")]
    AlreadyRunning(String),

    #[error("no process registered under '{0}'")]
    NotFound(String),
}

impl SupervisorError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "PROCESS_SPAWN",
            Self::AlreadyRunning(_) => "PROCESS_ALREADY_RUNNING",
            Self::NotFound(_) => "PROCESS_NOT_FOUND",
        }
    }
}
