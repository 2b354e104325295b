//! HTTP transport
//!
//! Each outbound envelope is a single POST. Whatever the server answers in the
//! body (plain JSON, a JSON batch, or an SSE stream of events) is queued and
//! handed out by `receive`, so the RPC client sees the same request/response
//! flow as on a streaming transport.

use super::{Transport, TransportError};
use crate::config::TransportKind;
use crate::protocol::Envelope;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const QUEUE_CAPACITY: usize = 256;

/// HTTP transport configuration
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Endpoint receiving the POSTs
    pub url: String,
    /// HTTP headers to include in requests
    pub headers: BTreeMap<String, String>,
    /// Per-POST timeout
    pub timeout: Duration,
}

impl HttpTransportConfig {
    /// Create a new HTTP transport config
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Add a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// HTTP transport
pub struct HttpTransport {
    client: Client,
    url: String,
    connected: AtomicBool,
    inbound_tx: mpsc::Sender<Envelope>,
    inbound_rx: Mutex<mpsc::Receiver<Envelope>>,
    closed: CancellationToken,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let mut header_map = HeaderMap::new();
        header_map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        header_map.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );

        for (key, value) in &config.headers {
            let name = HeaderName::try_from(key.as_str())
                .map_err(|e| TransportError::invalid_config(format!("header '{}': {}", key, e)))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| TransportError::invalid_config(format!("header '{}': {}", key, e)))?;
            header_map.insert(name, value);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(header_map)
            .build()
            .map_err(|e| TransportError::connect(format!("Failed to create HTTP client: {}", e)))?;

        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_CAPACITY);

        debug!("HTTP transport ready for {}", config.url);
        Ok(Self {
            client,
            url: config.url,
            connected: AtomicBool::new(true),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            closed: CancellationToken::new(),
        })
    }

    async fn enqueue(&self, envelopes: Vec<Envelope>) -> Result<(), TransportError> {
        for envelope in envelopes {
            self.inbound_tx
                .send(envelope)
                .await
                .map_err(|_| TransportError::closed("inbound queue closed"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::closed("Not connected"));
        }

        let json = serde_json::to_string(envelope)?;
        debug!("Sending HTTP message: {}", json);

        let response = self
            .client
            .post(&self.url)
            .body(json)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    TransportError::connect(format!("Failed to reach {}: {}", self.url, e))
                } else if e.is_timeout() {
                    TransportError::io(format!("POST to {} timed out", self.url))
                } else {
                    TransportError::io(format!("Failed to send message: {}", e))
                }
            })?;

        let status = response.status();
        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::http(format!("HTTP error {}: {}", status, body)));
        }

        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::io(format!("Failed to read response body: {}", e)))?;

        let envelopes = if is_sse {
            parse_sse_body(&body)
        } else {
            parse_json_body(&body)?
        };
        self.enqueue(envelopes).await
    }

    async fn receive(&self, timeout: Option<Duration>) -> Result<Envelope, TransportError> {
        let mut rx = self.inbound_rx.lock().await;
        let next = async {
            tokio::select! {
                _ = self.closed.cancelled() => None,
                msg = rx.recv() => msg,
            }
        };

        let msg = match timeout {
            Some(limit) => tokio::time::timeout(limit, next)
                .await
                .map_err(|_| TransportError::timeout(limit))?,
            None => next.await,
        };
        msg.ok_or_else(|| TransportError::closed("transport closed"))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.cancel();
        debug!("HTTP transport closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Parse a JSON response body holding one envelope or a batch
fn parse_json_body(body: &str) -> Result<Vec<Envelope>, TransportError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        Ok(serde_json::from_str::<Vec<Envelope>>(trimmed)?)
    } else {
        Ok(vec![serde_json::from_str::<Envelope>(trimmed)?])
    }
}

/// Parse an SSE body into envelopes, skipping events that do not decode
fn parse_sse_body(body: &str) -> Vec<Envelope> {
    body.replace("\r\n", "\n")
        .split("\n\n")
        .filter_map(parse_sse_event)
        .collect()
}

/// Parse an SSE event and extract the envelope
fn parse_sse_event(event: &str) -> Option<Envelope> {
    let mut data = String::new();

    for line in event.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data.push_str(value.trim());
        }
    }

    if data.is_empty() {
        return None;
    }

    match serde_json::from_str::<Envelope>(&data) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("Failed to parse SSE message: {} - data: {}", e, data);
            None
        }
    }
}
