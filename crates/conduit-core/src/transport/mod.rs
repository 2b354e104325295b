//! Transport layer implementations
//!
//! Every transport moves [`Envelope`]s in both directions and reports failures
//! through one error taxonomy, so the RPC client never needs to know which
//! wire it is talking over.
//!
//! ## Available Transports
//!
//! - **Stdio**: newline-delimited JSON over a supervised child's pipes
//! - **HTTP**: one POST per outbound envelope, response bodies queued for receive
//! - **WebSocket**: one text frame per envelope over a persistent socket

pub mod http;
pub mod stdio;
pub mod websocket;

pub use http::{HttpTransport, HttpTransportConfig};
pub use stdio::StdioTransport;
pub use websocket::{WebSocketTransport, WebSocketTransportConfig};

use crate::config::{ConnectionConfig, TransportKind};
use crate::error::{ConduitError, ConduitResult};
use crate::protocol::Envelope;
use crate::supervisor::{CommandSpec, ProcessSupervisor, RestartPolicy, SupervisorError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Environment variable carrying the credential to stdio children
pub const AUTH_TOKEN_ENV: &str = "CONDUIT_AUTH_TOKEN";

/// Bidirectional envelope channel
///
/// `send` and `receive` take `&self` and lock independently, so a receive that
/// is parked waiting for input never blocks an outgoing send.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Wire mechanism of this transport
    fn kind(&self) -> TransportKind;

    /// Send one envelope
    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Wait for the next inbound envelope
    ///
    /// With `Some(timeout)` the call fails with a `Timeout` error if nothing
    /// arrives in time; buffered partial input is kept for the next call.
    async fn receive(&self, timeout: Option<Duration>) -> Result<Envelope, TransportError>;

    /// Close the transport; idempotent
    async fn close(&self) -> Result<(), TransportError>;

    /// Whether the transport still considers itself usable
    fn is_connected(&self) -> bool;
}

/// Category of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// Could not establish the connection
    Connect,
    /// Read or write failed mid-stream
    Io,
    /// Peer closed the connection, or the transport was closed locally
    Closed,
    /// Nothing arrived within the receive deadline
    Timeout,
    /// Inbound data was not a valid envelope
    Decode,
    /// Remote answered with a non-success HTTP status
    Http,
    /// Transport could not be built from its configuration
    InvalidConfig,
}

impl TransportErrorKind {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connect => "TRANSPORT_CONNECT",
            Self::Io => "TRANSPORT_IO",
            Self::Closed => "TRANSPORT_CLOSED",
            Self::Timeout => "TRANSPORT_TIMEOUT",
            Self::Decode => "TRANSPORT_DECODE",
            Self::Http => "TRANSPORT_HTTP",
            Self::InvalidConfig => "TRANSPORT_CONFIG",
        }
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Connect => "connect",
            Self::Io => "io",
            Self::Closed => "closed",
            Self::Timeout => "timeout",
            Self::Decode => "decode",
            Self::Http => "http",
            Self::InvalidConfig => "config",
        };
        f.write_str(label)
    }
}

/// Transport failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("transport {kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Io, message)
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Closed, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            TransportErrorKind::Timeout,
            format!("nothing received within {:?}", after),
        )
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Decode, message)
    }

    pub fn http(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Http, message)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::InvalidConfig, message)
    }

    /// Whether the transport is unusable after this error
    ///
    /// Decode and timeout errors leave the stream intact.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self.kind,
            TransportErrorKind::Decode | TransportErrorKind::Timeout
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match error.kind() {
            ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted => Self::closed(error.to_string()),
            _ => Self::io(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(error: serde_json::Error) -> Self {
        Self::decode(error.to_string())
    }
}

/// Failure while opening a transport
#[derive(Debug, Clone, Error)]
pub enum OpenError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Process(#[from] SupervisorError),
}

/// Resolved transport parameters for one connection
#[derive(Debug, Clone)]
pub enum TransportConfig {
    /// Child process speaking over its stdin/stdout
    Stdio {
        command: CommandSpec,
        restart: RestartPolicy,
    },
    Http(HttpTransportConfig),
    WebSocket(WebSocketTransportConfig),
}

impl TransportConfig {
    /// Resolve a connection descriptor
    ///
    /// Credentials are mapped here: header transports receive them as a
    /// header, stdio children through [`AUTH_TOKEN_ENV`].
    pub fn from_connection(
        config: &ConnectionConfig,
        restart: RestartPolicy,
        request_timeout: Duration,
    ) -> ConduitResult<Self> {
        match config.transport {
            TransportKind::Stdio => {
                let program = config.command.clone().ok_or_else(|| {
                    ConduitError::config_with_context(
                        "stdio transport requires 'command'",
                        format!("connection '{}'", config.name),
                    )
                })?;
                let mut command = CommandSpec::new(program).with_args(config.args.clone());
                for (key, value) in &config.env {
                    command = command.with_env(key, value);
                }
                if let Some(secret) = config.auth.secret() {
                    command = command.with_env(AUTH_TOKEN_ENV, secret);
                }
                if let Some(cwd) = &config.cwd {
                    command = command.with_cwd(cwd.clone());
                }
                let restart = match config.auto_restart {
                    Some(enabled) => restart.with_enabled(enabled),
                    None => restart,
                };
                Ok(Self::Stdio { command, restart })
            }
            TransportKind::Http => {
                let url = required_url(config)?;
                let mut http = HttpTransportConfig::new(url).with_timeout(request_timeout);
                for (key, value) in &config.headers {
                    http = http.with_header(key, value);
                }
                if let Some((key, value)) = config.auth.header() {
                    http = http.with_header(key, value);
                }
                Ok(Self::Http(http))
            }
            TransportKind::Websocket => {
                let url = required_url(config)?;
                let mut ws = WebSocketTransportConfig::new(url);
                for (key, value) in &config.headers {
                    ws = ws.with_header(key, value);
                }
                if let Some((key, value)) = config.auth.header() {
                    ws = ws.with_header(key, value);
                }
                Ok(Self::WebSocket(ws))
            }
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio { .. } => TransportKind::Stdio,
            Self::Http(_) => TransportKind::Http,
            Self::WebSocket(_) => TransportKind::Websocket,
        }
    }

    /// Whether a supervised process backs this transport
    pub fn is_process_backed(&self) -> bool {
        matches!(self, Self::Stdio { .. })
    }

    /// Open a transport for connection `name`
    pub async fn open(
        &self,
        name: &str,
        processes: &ProcessSupervisor,
    ) -> Result<Arc<dyn Transport>, OpenError> {
        match self {
            Self::Stdio { command, restart } => {
                let transport = StdioTransport::launch(name, command, restart, processes).await?;
                Ok(Arc::new(transport))
            }
            Self::Http(config) => Ok(Arc::new(HttpTransport::new(config.clone())?)),
            Self::WebSocket(config) => Ok(Arc::new(WebSocketTransport::connect(config).await?)),
        }
    }

    /// Release whatever backs the transport once it has been closed
    pub async fn release(&self, name: &str, processes: &ProcessSupervisor) -> Result<(), OpenError> {
        if self.is_process_backed() {
            processes.stop(name).await?;
        }
        Ok(())
    }
}

fn required_url(config: &ConnectionConfig) -> ConduitResult<String> {
    let url = config.url.clone().ok_or_else(|| {
        ConduitError::config_with_context(
            format!("{} transport requires 'url'", config.transport),
            format!("connection '{}'", config.name),
        )
    })?;
    reqwest::Url::parse(&url).map_err(|e| {
        ConduitError::config_with_context(
            format!("invalid url '{}': {}", url, e),
            format!("connection '{}'", config.name),
        )
    })?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Auth;

    #[test]
    fn test_stdio_auth_goes_to_env() {
        let config = ConnectionConfig::stdio("local", "server", vec!["--quiet".into()]).with_auth(
            Auth::Bearer {
                token: "tok".into(),
            },
        );
        let resolved =
            TransportConfig::from_connection(&config, RestartPolicy::default(), Duration::from_secs(5))
                .unwrap();

        let TransportConfig::Stdio { command, .. } = resolved else {
            panic!("expected stdio");
        };
        assert_eq!(command.env.get(AUTH_TOKEN_ENV).map(String::as_str), Some("tok"));
        assert_eq!(command.args, vec!["--quiet".to_string()]);
    }

    #[test]
    fn test_http_auth_goes_to_header() {
        let config = ConnectionConfig::http("remote", "https://example.test/rpc").with_auth(
            Auth::ApiKey {
                key: "k".into(),
                header: "X-Token".into(),
            },
        );
        let resolved =
            TransportConfig::from_connection(&config, RestartPolicy::default(), Duration::from_secs(5))
                .unwrap();

        let TransportConfig::Http(http) = resolved else {
            panic!("expected http");
        };
        assert_eq!(http.headers.get("X-Token").map(String::as_str), Some("k"));
        assert!(!resolved_is_process_backed(&config));
    }

    fn resolved_is_process_backed(config: &ConnectionConfig) -> bool {
        TransportConfig::from_connection(config, RestartPolicy::default(), Duration::from_secs(1))
            .map(|c| c.is_process_backed())
            .unwrap_or(false)
    }

    #[test]
    fn test_missing_command_is_config_error() {
        let mut config = ConnectionConfig::stdio("broken", "x", vec![]);
        config.command = None;
        let err =
            TransportConfig::from_connection(&config, RestartPolicy::default(), Duration::from_secs(1))
                .unwrap_err();
        assert_eq!(err.error_code(), "CONFIG");
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = ConnectionConfig::websocket("ws", "not a url");
        assert!(
            TransportConfig::from_connection(&config, RestartPolicy::default(), Duration::from_secs(1))
                .is_err()
        );
    }

    #[test]
    fn test_auto_restart_override() {
        let config = ConnectionConfig::stdio("local", "server", vec![]).with_auto_restart(false);
        let policy = RestartPolicy::default().with_enabled(true);
        let resolved =
            TransportConfig::from_connection(&config, policy, Duration::from_secs(1)).unwrap();
        let TransportConfig::Stdio { restart, .. } = resolved else {
            panic!("expected stdio");
        };
        assert!(!restart.enabled);
    }

    #[test]
    fn test_io_error_mapping() {
        let err: TransportError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert_eq!(err.kind, TransportErrorKind::Closed);
        assert!(err.is_fatal());
        assert!(!TransportError::decode("bad").is_fatal());
    }
}
