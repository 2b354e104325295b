//! Background receive loop for the RPC client

use super::RpcError;
use super::notification::NotificationHandler;
use crate::protocol::{Envelope, ErrorObject, RequestId, RpcRequest, RpcResponse, methods};
use crate::transport::Transport;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub(super) type ResponseSender = oneshot::Sender<Result<RpcResponse, RpcError>>;

/// Outstanding requests keyed by id
pub(super) type PendingMap = Arc<Mutex<HashMap<RequestId, ResponseSender>>>;

/// Removes its pending entry when dropped
///
/// Whether the caller returns normally, times out, or has its future dropped,
/// the table never keeps an entry for a request nobody is waiting on.
pub(super) struct PendingGuard {
    pending: PendingMap,
    id: RequestId,
}

impl PendingGuard {
    pub(super) fn register(pending: &PendingMap, id: RequestId, sender: ResponseSender) -> Self {
        pending.lock().insert(id.clone(), sender);
        Self {
            pending: Arc::clone(pending),
            id,
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// Fail every outstanding request with `error`
pub(super) fn fail_all(pending: &PendingMap, error: RpcError) {
    let drained: Vec<_> = pending.lock().drain().collect();
    for (id, sender) in drained {
        debug!("Failing pending request {}: {}", id, error);
        let _ = sender.send(Err(error.clone()));
    }
}

pub(super) struct ReceiverContext {
    pub label: String,
    pub transport: Arc<dyn Transport>,
    pub pending: PendingMap,
    pub handler: Arc<dyn NotificationHandler>,
    pub running: Arc<AtomicBool>,
    pub shutdown: CancellationToken,
}

/// Route inbound envelopes until the transport fails or shutdown is requested
pub(super) async fn message_receiver(ctx: ReceiverContext) {
    loop {
        let result = tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                debug!(connection = %ctx.label, "RPC receiver shutting down");
                break;
            }
            result = ctx.transport.receive(None) => result,
        };

        match result {
            Ok(Envelope::Response(response)) => route_response(&ctx, response),
            Ok(Envelope::Notification(notification)) => {
                ctx.handler
                    .on_notification(&ctx.label, &notification.method, notification.params);
            }
            Ok(Envelope::Request(request)) => answer_server_request(&ctx, request).await,
            Err(e) if !e.is_fatal() => {
                warn!(connection = %ctx.label, "Discarding inbound message: {}", e);
            }
            Err(e) => {
                if !ctx.shutdown.is_cancelled() {
                    error!(connection = %ctx.label, "RPC transport failed: {}", e);
                }
                ctx.running.store(false, Ordering::SeqCst);
                fail_all(&ctx.pending, RpcError::Transport(e));
                return;
            }
        }
    }

    ctx.running.store(false, Ordering::SeqCst);
    fail_all(&ctx.pending, RpcError::NotConnected);
}

fn route_response(ctx: &ReceiverContext, response: RpcResponse) {
    let sender = ctx.pending.lock().remove(&response.id);
    match sender {
        Some(sender) => {
            let id = response.id.clone();
            if sender.send(Ok(response)).is_err() {
                debug!(connection = %ctx.label, "Caller for request {} is gone", id);
            }
        }
        None => {
            warn!(connection = %ctx.label, "Received response for unknown request: {}", response.id);
        }
    }
}

async fn answer_server_request(ctx: &ReceiverContext, request: RpcRequest) {
    let response = if request.method == methods::PING {
        RpcResponse::success(request.id, json!({}))
    } else {
        debug!(connection = %ctx.label, "Rejecting server request: {}", request.method);
        RpcResponse::error(request.id, ErrorObject::method_not_found())
    };

    if let Err(e) = ctx.transport.send(&response.into()).await {
        warn!(connection = %ctx.label, "Failed to answer server request: {}", e);
    }
}
