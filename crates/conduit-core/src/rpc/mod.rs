//! JSON-RPC client
//!
//! Provides request/response correlation on top of any [`Transport`].
//!
//! # Features
//! - Concurrent requests, responses matched by id in any order
//! - Per-request timeout and caller-driven cancellation
//! - Background receiver answering server pings and dispatching notifications
//! - Outstanding requests failed promptly when the transport dies

mod notification;
mod receiver;
mod types;

pub use notification::{LoggingNotificationHandler, NotificationHandler};
pub use types::{ClientInfo, InitializeParams, InitializeResult, RpcError, ServerInfo};

use crate::config::Capability;
use crate::protocol::{Envelope, RequestId, RpcNotification, RpcRequest, methods};
use crate::transport::Transport;
use parking_lot::{Mutex, RwLock};
use receiver::{PendingGuard, PendingMap, ReceiverContext};
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Default request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// JSON-RPC client bound to one transport
pub struct RpcClient {
    label: String,
    transport: Arc<dyn Transport>,
    pending: PendingMap,
    next_id: AtomicU64,
    request_timeout: Duration,
    running: Arc<AtomicBool>,
    shutdown: CancellationToken,
    server: RwLock<Option<InitializeResult>>,
    receiver_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    /// Create a client and start its background receiver
    pub fn new(label: impl Into<String>, transport: Arc<dyn Transport>, request_timeout: Duration) -> Self {
        Self::with_handler(
            label,
            transport,
            request_timeout,
            Arc::new(LoggingNotificationHandler),
        )
    }

    /// Create a client with a custom notification handler
    pub fn with_handler(
        label: impl Into<String>,
        transport: Arc<dyn Transport>,
        request_timeout: Duration,
        handler: Arc<dyn NotificationHandler>,
    ) -> Self {
        let label = label.into();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let running = Arc::new(AtomicBool::new(true));
        let shutdown = CancellationToken::new();

        let receiver_handle = tokio::spawn(receiver::message_receiver(ReceiverContext {
            label: label.clone(),
            transport: Arc::clone(&transport),
            pending: Arc::clone(&pending),
            handler,
            running: Arc::clone(&running),
            shutdown: shutdown.clone(),
        }));

        Self {
            label,
            transport,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
            running,
            shutdown,
            server: RwLock::new(None),
            receiver_handle: Mutex::new(Some(receiver_handle)),
        }
    }

    /// Perform the `initialize` handshake and send `notifications/initialized`
    #[instrument(skip(self, capabilities), fields(connection = %self.label), level = "debug")]
    pub async fn initialize(
        &self,
        client_info: ClientInfo,
        capabilities: &BTreeSet<Capability>,
    ) -> Result<InitializeResult, RpcError> {
        let params = InitializeParams::new(client_info, capabilities);
        let params = serde_json::to_value(params).map_err(|e| RpcError::protocol(e.to_string()))?;

        let value = self.request(methods::INITIALIZE, Some(params), None).await?;
        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|e| RpcError::protocol(format!("invalid initialize result: {}", e)))?;

        debug!(
            "Connected to {} {} (protocol {})",
            result.server_info.name, result.server_info.version, result.protocol_version
        );
        *self.server.write() = Some(result.clone());

        self.notify(methods::INITIALIZED, None).await?;
        Ok(result)
    }

    /// Handshake result, once `initialize` has succeeded
    pub fn server(&self) -> Option<InitializeResult> {
        self.server.read().clone()
    }

    /// Send a request and wait for its result
    ///
    /// `timeout` overrides the client default for this call.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError> {
        self.request_with_cancel(method, params, timeout, &CancellationToken::new())
            .await
    }

    /// Send a request that the caller can abandon through `cancel`
    ///
    /// On cancellation or timeout the peer is told with
    /// `notifications/cancelled`; a late response is discarded.
    pub async fn request_with_cancel(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Value, RpcError> {
        if !self.is_connected() {
            return Err(RpcError::NotConnected);
        }

        let id = self.next_request_id();
        let mut request = RpcRequest::new(id.clone(), method);
        if let Some(params) = params {
            request = request.with_params(params);
        }

        let (sender, response) = oneshot::channel();
        let guard = PendingGuard::register(&self.pending, id.clone(), sender);
        let limit = timeout.unwrap_or(self.request_timeout);

        let exchange = async {
            self.transport.send(&Envelope::Request(request)).await?;
            response.await.map_err(|_| RpcError::NotConnected)?
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(RpcError::Cancelled),
            result = tokio::time::timeout(limit, exchange) => match result {
                Ok(inner) => inner,
                Err(_) => Err(RpcError::Timeout { method: method.to_string(), after: limit }),
            },
        };
        drop(guard);

        match outcome {
            Ok(response) => response.into_result().map_err(RpcError::from),
            Err(e @ (RpcError::Cancelled | RpcError::Timeout { .. })) => {
                self.send_cancelled(&id, &e).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Send a notification (no response expected)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        if !self.is_connected() {
            return Err(RpcError::NotConnected);
        }
        let mut notification = RpcNotification::new(method);
        if let Some(params) = params {
            notification = notification.with_params(params);
        }
        self.transport
            .send(&Envelope::Notification(notification))
            .await
            .map_err(RpcError::from)
    }

    /// Round-trip a `ping` request
    pub async fn ping(&self, timeout: Duration) -> Result<(), RpcError> {
        self.request(methods::PING, None, Some(timeout)).await.map(|_| ())
    }

    /// Stop the receiver, close the transport, and fail anything outstanding
    ///
    /// Safe to call more than once.
    pub async fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();

        if let Err(e) = self.transport.close().await {
            debug!(connection = %self.label, "Transport close failed: {}", e);
        }

        let handle = self.receiver_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        receiver::fail_all(&self.pending, RpcError::NotConnected);
    }

    /// Whether the receiver is alive and the transport usable
    pub fn is_connected(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.transport.is_connected()
    }

    /// Number of requests awaiting a response
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    async fn send_cancelled(&self, id: &RequestId, reason: &RpcError) {
        let params = json!({"requestId": id, "reason": reason.to_string()});
        if let Err(e) = self.notify(methods::CANCELLED, Some(params)).await {
            debug!(connection = %self.label, "Could not send cancellation for {}: {}", id, e);
        }
    }

    fn next_request_id(&self) -> RequestId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        match i64::try_from(id) {
            Ok(n) => RequestId::Number(n),
            Err(_) => RequestId::String(format!("req-{}", id)),
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        if let Some(handle) = self.receiver_handle.lock().take() {
            handle.abort();
        }
    }
}
