//! Handlers for notifications arriving from the peer

use serde_json::Value;
use tracing::debug;

/// Called from the receive loop for every inbound notification
///
/// Runs inline on the receiver task, so implementations must not block.
#[cfg_attr(test, mockall::automock)]
pub trait NotificationHandler: Send + Sync {
    fn on_notification(&self, connection: &str, method: &str, params: Option<Value>);
}

/// Default handler that logs notifications
pub struct LoggingNotificationHandler;

impl NotificationHandler for LoggingNotificationHandler {
    fn on_notification(&self, connection: &str, method: &str, params: Option<Value>) {
        debug!(connection, "notification {} {:?}", method, params);
    }
}
