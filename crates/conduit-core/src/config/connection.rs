//! Connection descriptors supplied by the surrounding application

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

fn default_true() -> bool {
    true
}

fn default_capabilities() -> BTreeSet<Capability> {
    [Capability::Tools, Capability::Notifications].into_iter().collect()
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

/// Wire mechanism used to reach a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
    #[serde(alias = "ws")]
    Websocket,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
            Self::Websocket => "websocket",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feature flags declared to the remote side during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Tools,
    Resources,
    Prompts,
    Notifications,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tools => "tools",
            Self::Resources => "resources",
            Self::Prompts => "prompts",
            Self::Notifications => "notifications",
        }
    }
}

/// Credential interpreted by the transport
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Auth {
    #[default]
    None,
    Bearer {
        token: String,
    },
    ApiKey {
        key: String,
        #[serde(default = "default_api_key_header")]
        header: String,
    },
}

impl Auth {
    /// HTTP header carrying the credential, if any
    pub fn header(&self) -> Option<(String, String)> {
        match self {
            Self::None => None,
            Self::Bearer { token } => Some(("Authorization".to_string(), format!("Bearer {}", token))),
            Self::ApiKey { key, header } => Some((header.clone(), key.clone())),
        }
    }

    /// Raw secret, handed to stdio children through the environment
    pub fn secret(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Bearer { token } => Some(token),
            Self::ApiKey { key, .. } => Some(key),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bearer { .. } => f.write_str("Bearer(<redacted>)"),
            Self::ApiKey { header, .. } => write!(f, "ApiKey({}: <redacted>)", header),
        }
    }
}

/// Configuration for a single named connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Unique name
    pub name: String,
    /// Transport type: "stdio", "http", or "websocket"
    pub transport: TransportKind,
    /// Command to execute (for stdio transport)
    #[serde(default)]
    pub command: Option<String>,
    /// Command arguments (for stdio transport)
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables (for stdio transport)
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory (for stdio transport)
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Endpoint URL (for http/websocket transport)
    #[serde(default)]
    pub url: Option<String>,
    /// Extra headers (for http/websocket transport)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default = "default_capabilities")]
    pub capabilities: BTreeSet<Capability>,
    /// Whether this connection is started by batch operations
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Request timeout in seconds (overrides the runtime default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Restart the backing process when it dies (overrides the supervisor default)
    #[serde(default)]
    pub auto_restart: Option<bool>,
}

impl ConnectionConfig {
    fn base(name: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            name: name.into(),
            transport,
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            url: None,
            headers: BTreeMap::new(),
            auth: Auth::None,
            capabilities: default_capabilities(),
            enabled: true,
            timeout_secs: None,
            auto_restart: None,
        }
    }

    /// Create a stdio connection config
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: Some(command.into()),
            args,
            ..Self::base(name, TransportKind::Stdio)
        }
    }

    /// Create an HTTP connection config
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::base(name, TransportKind::Http)
        }
    }

    /// Create a WebSocket connection config
    pub fn websocket(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::base(name, TransportKind::Websocket)
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_auto_restart(mut self, enabled: bool) -> Self {
        self.auto_restart = Some(enabled);
        self
    }

    /// Human-readable endpoint (command line or URL)
    pub fn endpoint_display(&self) -> String {
        match self.transport {
            TransportKind::Stdio => {
                let mut parts = vec![self.command.clone().unwrap_or_default()];
                parts.extend(self.args.iter().cloned());
                parts.join(" ")
            }
            TransportKind::Http | TransportKind::Websocket => self.url.clone().unwrap_or_default(),
        }
    }
}
