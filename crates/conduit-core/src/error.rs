//! Error types for Conduit
//!
//! Each subsystem has its own error enum ([`TransportError`], [`RpcError`],
//! [`SupervisorError`], [`ManagerError`], [`WatchError`]). `ConduitError`
//! unifies them for callers that drive several subsystems at once, such as the
//! CLI run loop.

use crate::logwatch::WatchError;
use crate::manager::ManagerError;
use crate::rpc::RpcError;
use crate::supervisor::SupervisorError;
use crate::transport::TransportError;
use thiserror::Error;

/// Result type alias for Conduit operations
pub type ConduitResult<T> = Result<T, ConduitError>;

/// Main error type for Conduit
#[derive(Error, Debug, Clone)]
pub enum ConduitError {
    /// Configuration related errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        context: Option<String>,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    /// IO errors outside a transport
    #[error("IO error: {0}")]
    Io(String),

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,
}

impl ConduitError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            context: None,
        }
    }

    /// Create a configuration error with context describing where it happened
    pub fn config_with_context(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            context: Some(context.into()),
        }
    }

    /// Stable code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "CONFIG",
            Self::Transport(e) => e.kind.error_code(),
            Self::Rpc(e) => e.error_code(),
            Self::Supervisor(e) => e.error_code(),
            Self::Manager(e) => e.error_code(),
            Self::Watch(_) => "WATCH",
            Self::Io(_) => "IO",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Optional context attached to the error
    pub fn context(&self) -> Option<&str> {
        match self {
            Self::Config { context, .. } => context.as_deref(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConduitError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}
