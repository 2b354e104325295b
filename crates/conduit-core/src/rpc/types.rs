//! RPC client error and handshake types

use crate::config::Capability;
use crate::protocol::{ErrorObject, PROTOCOL_VERSION};
use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`RpcClient`](super::RpcClient)
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// No response arrived in time
    #[error("request '{method}' timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    /// The underlying transport failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The peer sent something that violates the protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer answered with a JSON-RPC error object
    #[error("remote error {code}: {message}")]
    Remote {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    /// The caller cancelled the request
    #[error("request cancelled")]
    Cancelled,

    /// The client has been closed or its receiver has stopped
    #[error("client is not connected")]
    NotConnected,
}

impl RpcError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "RPC_TIMEOUT",
            Self::Transport(e) => e.kind.error_code(),
            Self::Protocol(_) => "RPC_PROTOCOL",
            Self::Remote { .. } => "RPC_REMOTE",
            Self::Cancelled => "RPC_CANCELLED",
            Self::NotConnected => "RPC_NOT_CONNECTED",
        }
    }

    /// Check if this error is retryable on a fresh connection
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::NotConnected => true,
            Self::Transport(e) => e.is_fatal(),
            Self::Protocol(_) | Self::Remote { .. } | Self::Cancelled => false,
        }
    }
}

impl From<ErrorObject> for RpcError {
    fn from(error: ErrorObject) -> Self {
        Self::Remote {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

/// Identity announced to the peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "conduit".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Identity reported by the peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Parameters of the `initialize` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Map<String, Value>,
    pub client_info: ClientInfo,
}

impl InitializeParams {
    pub fn new(client_info: ClientInfo, capabilities: &BTreeSet<Capability>) -> Self {
        let capabilities = capabilities
            .iter()
            .map(|c| (c.as_str().to_string(), Value::Object(Map::new())))
            .collect();
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities,
            client_info,
        }
    }
}

/// Result of the `initialize` request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub server_info: ServerInfo,
}
