//! Forwarding of classified log errors to connections
//!
//! Each qualifying [`ErrorEvent`] becomes one logging notification per
//! target, sent through the [`ConnectionManager`] concurrently. Delivery
//! results are collected per target; a failing target never stops the others.

use crate::config::ForwarderConfig;
use crate::logwatch::ErrorEvent;
use crate::manager::{ConnectionManager, ManagerError};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Logger name carried in every forwarded notification
pub const LOGGER_NAME: &str = "conduit.log-watcher";

/// Delivery outcome for one event
#[derive(Debug, Default)]
pub struct ForwardReport {
    /// Whether the event passed the severity filter
    pub forwarded: bool,
    pub results: BTreeMap<String, Result<(), ManagerError>>,
}

impl ForwardReport {
    pub fn delivered(&self) -> usize {
        self.results.values().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = (&String, &ManagerError)> {
        self.results
            .iter()
            .filter_map(|(name, r)| r.as_ref().err().map(|e| (name, e)))
    }
}

/// Totals over a forwarder run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub received: u64,
    pub filtered: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Fan-out of error events to configured targets
pub struct NotificationForwarder {
    manager: ConnectionManager,
    config: ForwarderConfig,
}

impl NotificationForwarder {
    pub fn new(manager: ConnectionManager, config: ForwarderConfig) -> Self {
        Self { manager, config }
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    /// Whether `event` is severe enough to forward
    pub fn accepts(&self, event: &ErrorEvent) -> bool {
        event.severity >= self.config.min_severity
    }

    /// Notification params for `event`
    pub fn payload(event: &ErrorEvent) -> Value {
        json!({
            "level": event.severity.as_str(),
            "logger": LOGGER_NAME,
            "data": {
                "kind": event.kind,
                "severity": event.severity,
                "message": event.message,
                "block": event.block,
                "location": event.location,
                "fingerprint": event.fingerprint,
                "detected_at": event.detected_at.to_rfc3339(),
            }
        })
    }

    /// Send `event` to every target
    pub async fn forward(&self, event: &ErrorEvent) -> ForwardReport {
        if !self.accepts(event) {
            debug!(
                "Not forwarding {} ({} below {})",
                event.kind, event.severity, self.config.min_severity
            );
            return ForwardReport::default();
        }

        let results = self
            .manager
            .notify_all(&self.config.targets, &self.config.method, Some(Self::payload(event)))
            .await;
        ForwardReport {
            forwarded: true,
            results,
        }
    }

    /// Forward events from `events` until cancelled or the channel closes
    pub async fn run(&self, mut events: mpsc::Receiver<ErrorEvent>, token: CancellationToken) -> ForwardStats {
        let mut stats = ForwardStats::default();
        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            stats.received += 1;
            let report = self.forward(&event).await;
            if !report.forwarded {
                stats.filtered += 1;
                continue;
            }

            stats.delivered += report.delivered() as u64;
            for (target, error) in report.failed() {
                stats.failed += 1;
                warn!("Failed to forward {} to '{}': {}", event.kind, target, error);
            }
            info!(
                "Forwarded {} '{}' to {}/{} targets",
                event.kind,
                event.message,
                report.delivered(),
                report.results.len()
            );
        }
        stats
    }
}
