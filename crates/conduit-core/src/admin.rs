//! Administrative operations over the connection manager
//!
//! Every operation accepts a single name or all connections and returns a
//! [`BatchReport`]. Batches always visit every item, so one failure never
//! hides the outcome of the others.

use crate::manager::{ConnectionManager, ConnectionStatus};
use futures::future::join_all;
use serde::Serialize;
use std::time::Instant;

/// Which connections an operation applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    One(String),
    /// Every enabled connection (all registered ones for `status`)
    All,
}

impl From<Option<String>> for Target {
    fn from(name: Option<String>) -> Self {
        name.map_or(Self::All, Self::One)
    }
}

/// Outcome for one connection
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub name: String,
    pub success: bool,
    pub message: String,
    pub latency_ms: Option<u64>,
}

impl BatchItem {
    fn ok(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            message: message.into(),
            latency_ms: None,
        }
    }

    fn failed(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            message: message.into(),
            latency_ms: None,
        }
    }
}

/// Per-connection outcomes of one operation
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.success).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.items.iter().all(|i| i.success)
    }
}

/// start / stop / status / test for one or all connections
#[derive(Clone)]
pub struct AdminService {
    manager: ConnectionManager,
}

impl AdminService {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Resolve a target; unknown names become failed items
    fn resolve(&self, target: &Target, enabled_only: bool) -> (Vec<String>, Vec<BatchItem>) {
        match target {
            Target::One(name) if self.manager.config(name).is_some() => (vec![name.clone()], Vec::new()),
            Target::One(name) => (
                Vec::new(),
                vec![BatchItem::failed(name, format!("unknown connection '{}'", name))],
            ),
            Target::All => {
                let names = self
                    .manager
                    .names()
                    .into_iter()
                    .filter(|name| {
                        !enabled_only || self.manager.config(name).is_some_and(|c| c.enabled)
                    })
                    .collect();
                (names, Vec::new())
            }
        }
    }

    async fn run<F, Fut>(&self, target: &Target, enabled_only: bool, op: F) -> BatchReport
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = BatchItem>,
    {
        let (names, mut items) = self.resolve(target, enabled_only);
        items.extend(join_all(names.into_iter().map(op)).await);
        items.sort_by(|a, b| a.name.cmp(&b.name));
        BatchReport { items }
    }

    pub async fn start(&self, target: &Target) -> BatchReport {
        self.run(target, true, |name| async move {
            if self.manager.start_connection(&name).await {
                BatchItem::ok(&name, "started")
            } else {
                let reason = self
                    .manager
                    .snapshot(&name)
                    .and_then(|s| s.last_error)
                    .unwrap_or_else(|| "start failed".to_string());
                BatchItem::failed(&name, reason)
            }
        })
        .await
    }

    pub async fn stop(&self, target: &Target) -> BatchReport {
        self.run(target, false, |name| async move {
            if self.manager.stop_connection(&name).await {
                BatchItem::ok(&name, "stopped")
            } else {
                BatchItem::failed(&name, "stop failed")
            }
        })
        .await
    }

    /// Current status; success means the connection is active
    pub async fn status(&self, target: &Target) -> BatchReport {
        self.run(target, false, |name| async move {
            let active = self.manager.is_connection_active(&name);
            let message = match self.manager.snapshot(&name) {
                Some(s) => match (s.status, s.last_error) {
                    (ConnectionStatus::Error, Some(e)) => format!("error: {}", e),
                    (status, _) => status.to_string(),
                },
                None => "unknown".to_string(),
            };
            BatchItem {
                success: active,
                ..BatchItem::ok(&name, message)
            }
        })
        .await
    }

    /// Start if needed, then ping and report the round-trip latency
    pub async fn test(&self, target: &Target) -> BatchReport {
        self.run(target, true, |name| async move {
            let started = Instant::now();
            if !self.manager.start_connection(&name).await {
                let reason = self
                    .manager
                    .snapshot(&name)
                    .and_then(|s| s.last_error)
                    .unwrap_or_else(|| "connect failed".to_string());
                return BatchItem::failed(&name, reason);
            }
            match self.manager.check_connection_health(&name).await {
                Ok(health) if health.healthy => BatchItem {
                    latency_ms: health.ping_latency_ms,
                    ..BatchItem::ok(
                        &name,
                        format!("ok (connected in {} ms)", started.elapsed().as_millis()),
                    )
                },
                Ok(health) => BatchItem::failed(
                    &name,
                    health.error.unwrap_or_else(|| health.status.to_string()),
                ),
                Err(e) => BatchItem::failed(&name, e.to_string()),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::manager::ManagerSettings;
    use crate::supervisor::ProcessSupervisor;
    use std::time::Duration;

    fn service() -> AdminService {
        let settings = ManagerSettings::default().with_connect_attempts(1, Duration::ZERO);
        let manager = ConnectionManager::new(settings, ProcessSupervisor::default());
        manager
            .register(ConnectionConfig::http("b-down", "http://127.0.0.1:9/rpc"))
            .unwrap();
        let mut disabled = ConnectionConfig::http("a-disabled", "http://127.0.0.1:9/rpc");
        disabled.enabled = false;
        manager.register(disabled).unwrap();
        AdminService::new(manager)
    }

    #[test]
    fn test_target_from_option() {
        assert_eq!(Target::from(None), Target::All);
        assert_eq!(Target::from(Some("x".to_string())), Target::One("x".into()));
    }

    #[tokio::test]
    async fn test_start_all_skips_disabled_and_reports_failure() {
        let admin = service();
        let report = admin.start(&Target::All).await;
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].name, "b-down");
        assert!(!report.items[0].success);
        assert!(!report.all_succeeded());
    }

    #[tokio::test]
    async fn test_unknown_target_is_failed_item() {
        let admin = service();
        let report = admin.stop(&Target::One("nope".into())).await;
        assert_eq!(report.failed(), 1);
        assert!(report.items[0].message.contains("unknown connection"));
    }

    #[tokio::test]
    async fn test_status_covers_every_connection() {
        let admin = service();
        let report = admin.status(&Target::All).await;
        let names: Vec<&str> = report.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a-disabled", "b-down"]);
        assert!(report.items.iter().all(|i| i.message == "inactive"));
    }

    #[tokio::test]
    async fn test_stop_all_succeeds_when_idle() {
        let admin = service();
        let report = admin.stop(&Target::All).await;
        assert_eq!(report.succeeded(), 2);
    }
}
