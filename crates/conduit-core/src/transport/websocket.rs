//! WebSocket transport
//!
//! One text frame per envelope over a persistent socket. The stream is split
//! so the reader and writer halves lock independently.

use super::{Transport, TransportError};
use crate::config::TransportKind;
use crate::protocol::Envelope;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport configuration
#[derive(Debug, Clone)]
pub struct WebSocketTransportConfig {
    /// `ws://` or `wss://` endpoint
    pub url: String,
    /// Headers sent with the upgrade request
    pub headers: BTreeMap<String, String>,
    /// Deadline for the opening handshake
    pub connect_timeout: Duration,
}

impl WebSocketTransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// WebSocket transport
pub struct WebSocketTransport {
    writer: Mutex<SplitSink<WsStream, Message>>,
    reader: Mutex<SplitStream<WsStream>>,
    connected: AtomicBool,
    closed: CancellationToken,
}

impl WebSocketTransport {
    /// Connect to the configured endpoint
    pub async fn connect(config: &WebSocketTransportConfig) -> Result<Self, TransportError> {
        let mut request = config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::invalid_config(format!("url '{}': {}", config.url, e)))?;

        for (key, value) in &config.headers {
            let name = HeaderName::try_from(key.as_str())
                .map_err(|e| TransportError::invalid_config(format!("header '{}': {}", key, e)))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| TransportError::invalid_config(format!("header '{}': {}", key, e)))?;
            request.headers_mut().insert(name, value);
        }

        let (ws, _response) = tokio::time::timeout(config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                TransportError::connect(format!(
                    "handshake with {} timed out after {:?}",
                    config.url, config.connect_timeout
                ))
            })?
            .map_err(|e| TransportError::connect(format!("Failed to connect to {}: {}", config.url, e)))?;

        let (writer, reader) = ws.split();
        debug!("WebSocket transport connected to {}", config.url);

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            connected: AtomicBool::new(true),
            closed: CancellationToken::new(),
        })
    }

    async fn next_envelope(&self) -> Result<Envelope, TransportError> {
        let mut reader = self.reader.lock().await;
        loop {
            let next = tokio::select! {
                _ = self.closed.cancelled() => {
                    return Err(TransportError::closed("transport closed"));
                }
                next = reader.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str::<Envelope>(&text).map_err(TransportError::from);
                }
                Some(Ok(Message::Binary(bytes))) => {
                    return serde_json::from_slice::<Envelope>(&bytes).map_err(TransportError::from);
                }
                Some(Ok(Message::Close(frame))) => {
                    self.connected.store(false, Ordering::SeqCst);
                    let code: u16 = frame.as_ref().map_or(1000, |f| f.code.into());
                    return Err(TransportError::closed(format!("peer sent close frame ({})", code)));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    // tungstenite answers pings itself
                }
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(map_ws_error(e));
                }
                None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::closed("stream ended"));
                }
            }
        }
    }
}

fn map_ws_error(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::closed(error.to_string())
        }
        tungstenite::Error::Io(io) => io.into(),
        other => TransportError::io(other.to_string()),
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Websocket
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::closed("Not connected"));
        }
        let json = serde_json::to_string(envelope)?;
        let mut writer = self.writer.lock().await;
        writer.send(Message::Text(json.into())).await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            map_ws_error(e)
        })
    }

    async fn receive(&self, timeout: Option<Duration>) -> Result<Envelope, TransportError> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.next_envelope())
                .await
                .map_err(|_| TransportError::timeout(limit))?,
            None => self.next_envelope().await,
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            self.closed.cancel();
            return Ok(());
        }
        self.closed.cancel();

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "closing".into(),
        };
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.send(Message::Close(Some(frame))).await {
            warn!("Failed to send WebSocket close frame: {}", e);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportErrorKind;

    #[test]
    fn test_config_builder() {
        let config = WebSocketTransportConfig::new("ws://localhost:9000/rpc")
            .with_header("Authorization", "Bearer t")
            .with_connect_timeout(Duration::from_secs(2));
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.headers.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let config = WebSocketTransportConfig::new("ws://127.0.0.1:9/rpc")
            .with_connect_timeout(Duration::from_secs(2));
        let err = WebSocketTransport::connect(&config).await.err().unwrap();
        assert_eq!(err.kind, TransportErrorKind::Connect);
    }

    #[tokio::test]
    async fn test_round_trip_against_local_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let req: serde_json::Value = serde_json::from_str(&text).unwrap();
                    let reply = serde_json::json!({"jsonrpc": "2.0", "id": req["id"], "result": {}});
                    ws.send(Message::Text(reply.to_string().into())).await.unwrap();
                }
            }
        });

        let config = WebSocketTransportConfig::new(format!("ws://{}", addr));
        let transport = WebSocketTransport::connect(&config).await.unwrap();
        transport
            .send(&crate::protocol::RpcRequest::new(7i64, "ping").into())
            .await
            .unwrap();
        let reply = transport.receive(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(reply.id(), Some(&crate::protocol::RequestId::Number(7)));

        transport.close().await.unwrap();
        assert!(!transport.is_connected());
        server.abort();
    }
}
