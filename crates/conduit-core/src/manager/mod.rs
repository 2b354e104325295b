//! Connection manager
//!
//! The registry of named connections and the single answer to "is this
//! connection usable right now". Each active connection owns exactly one
//! transport and [`RpcClient`]; stdio connections additionally own a process
//! in the shared [`ProcessSupervisor`].
//!
//! Membership lives in a `DashMap`, and each entry has its own async lifecycle
//! lock, so starting or stopping one connection never waits on another. RPC
//! traffic clones the entry's `Arc<RpcClient>` and holds no lock while
//! awaiting.

mod types;

pub use types::{
    ConnectionHealth, ConnectionSnapshot, ConnectionState, ConnectionStatus, ManagerError,
    ManagerSettings,
};

use crate::clock::Ticker;
use crate::config::{ConduitConfig, ConnectionConfig};
use crate::error::{ConduitError, ConduitResult};
use crate::rpc::{
    ClientInfo, LoggingNotificationHandler, NotificationHandler, RpcClient, RpcError,
};
use crate::supervisor::{ProcessEvent, ProcessSupervisor};
use crate::transport::TransportConfig;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Default)]
struct Counters {
    requests_ok: AtomicU64,
    requests_failed: AtomicU64,
    notifications_sent: AtomicU64,
}

struct Entry {
    config: ConnectionConfig,
    transport: TransportConfig,
    request_timeout: Duration,
    lifecycle: tokio::sync::Mutex<()>,
    state: RwLock<ConnectionState>,
    client: RwLock<Option<Arc<RpcClient>>>,
    counters: Counters,
}

impl Entry {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn current_client(&self) -> Option<Arc<RpcClient>> {
        self.client.read().clone()
    }

    /// Downgrade to error, unless `client` has already been replaced
    fn fail_session(&self, client: &Arc<RpcClient>, message: String) {
        let current = self.client.read();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, client)) {
            let mut state = self.state.write();
            if state.status == ConnectionStatus::Active {
                warn!("Connection '{}' degraded: {}", self.name(), message);
                state.fail(message);
            }
        }
    }
}

struct Inner {
    entries: DashMap<String, Arc<Entry>>,
    processes: ProcessSupervisor,
    settings: ManagerSettings,
    handler: Arc<dyn NotificationHandler>,
    client_info: ClientInfo,
}

/// Registry and lifecycle owner of named connections
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(settings: ManagerSettings, processes: ProcessSupervisor) -> Self {
        Self::with_handler(settings, processes, Arc::new(LoggingNotificationHandler))
    }

    /// Create a manager whose clients pass inbound notifications to `handler`
    pub fn with_handler(
        settings: ManagerSettings,
        processes: ProcessSupervisor,
        handler: Arc<dyn NotificationHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                processes,
                settings,
                handler,
                client_info: ClientInfo::default(),
            }),
        }
    }

    /// Build a manager and its supervisor from configuration
    pub fn from_config(config: &ConduitConfig) -> ConduitResult<Self> {
        let processes = ProcessSupervisor::new(config.supervisor.settings());
        let manager = Self::new(ManagerSettings::from_config(config), processes);
        for connection in &config.connections {
            manager.register(connection.clone())?;
        }
        Ok(manager)
    }

    /// Add a connection to the registry (inactive)
    pub fn register(&self, config: ConnectionConfig) -> ConduitResult<()> {
        let request_timeout = config
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.inner.settings.request_timeout);
        let transport =
            TransportConfig::from_connection(&config, self.inner.settings.restart.clone(), request_timeout)?;

        match self.inner.entries.entry(config.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ConduitError::from(ManagerError::AlreadyRegistered(config.name)))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!("Registered {} connection '{}'", transport.kind(), config.name);
                slot.insert(Arc::new(Entry {
                    config,
                    transport,
                    request_timeout,
                    lifecycle: tokio::sync::Mutex::new(()),
                    state: RwLock::new(ConnectionState::default()),
                    client: RwLock::new(None),
                    counters: Counters::default(),
                }));
                Ok(())
            }
        }
    }

    /// Registered connection names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn config(&self, name: &str) -> Option<ConnectionConfig> {
        self.entry(name).map(|e| e.config.clone())
    }

    pub fn processes(&self) -> &ProcessSupervisor {
        &self.inner.processes
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    fn entry(&self, name: &str) -> Option<Arc<Entry>> {
        self.inner.entries.get(name).map(|e| Arc::clone(e.value()))
    }

    fn entry_is_active(&self, entry: &Entry) -> bool {
        if entry.state.read().status != ConnectionStatus::Active {
            return false;
        }
        if !entry.current_client().is_some_and(|c| c.is_connected()) {
            return false;
        }
        !entry.transport.is_process_backed() || self.inner.processes.is_running(entry.name())
    }

    /// Connect `name`, retrying the connect step
    ///
    /// Starting an active connection is a no-op that returns `true`. On
    /// failure the status becomes `error` with the last message retained.
    #[instrument(skip(self), level = "debug")]
    pub async fn start_connection(&self, name: &str) -> bool {
        let Some(entry) = self.entry(name) else {
            warn!("Cannot start unknown connection '{}'", name);
            return false;
        };
        let _lifecycle = entry.lifecycle.lock().await;
        if self.entry_is_active(&entry) {
            debug!("Connection '{}' already active", name);
            return true;
        }

        let stale = entry.client.write().take();
        if let Some(stale) = stale {
            stale.close().await;
        }
        entry.state.write().status = ConnectionStatus::Connecting;

        let settings = &self.inner.settings;
        let attempts = settings.connect_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.connect_once(&entry).await {
                Ok(client) => {
                    let server = client.server();
                    *entry.client.write() = Some(client);
                    let mut state = entry.state.write();
                    state.status = ConnectionStatus::Active;
                    state.last_connected = Some(Utc::now());
                    state.last_error = None;
                    state.server = server;
                    info!("Connection '{}' active", name);
                    return true;
                }
                Err(e) => {
                    warn!(
                        "Connect attempt {}/{} for '{}' failed: {}",
                        attempt, attempts, name, e
                    );
                    last_error = e;
                    if attempt < attempts {
                        tokio::time::sleep(settings.connect_retry_delay).await;
                    }
                }
            }
        }

        entry.state.write().fail(last_error);
        false
    }

    async fn connect_once(&self, entry: &Entry) -> Result<Arc<RpcClient>, String> {
        let name = entry.name();
        let transport = entry
            .transport
            .open(name, &self.inner.processes)
            .await
            .map_err(|e| e.to_string())?;

        let client = Arc::new(RpcClient::with_handler(
            name,
            transport,
            entry.request_timeout,
            Arc::clone(&self.inner.handler),
        ));

        match client
            .initialize(self.inner.client_info.clone(), &entry.config.capabilities)
            .await
        {
            Ok(_) => Ok(client),
            Err(e) => {
                client.close().await;
                if let Err(release) = entry.transport.release(name, &self.inner.processes).await {
                    debug!("Releasing '{}' after failed handshake: {}", name, release);
                }
                Err(format!("handshake failed: {}", e))
            }
        }
    }

    /// Disconnect `name` and stop its process
    ///
    /// Returns `false` only for unknown names or when the process could not
    /// be stopped; the connection is inactive afterwards either way.
    #[instrument(skip(self), level = "debug")]
    pub async fn stop_connection(&self, name: &str) -> bool {
        let Some(entry) = self.entry(name) else {
            warn!("Cannot stop unknown connection '{}'", name);
            return false;
        };
        let _lifecycle = entry.lifecycle.lock().await;

        let client = entry.client.write().take();
        if let Some(client) = client {
            client.close().await;
        }
        let released = match entry.transport.release(name, &self.inner.processes).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to release '{}': {}", name, e);
                false
            }
        };

        let mut state = entry.state.write();
        state.status = ConnectionStatus::Inactive;
        state.last_error = None;
        state.server = None;
        info!("Connection '{}' stopped", name);
        released
    }

    /// Whether `name` can carry traffic right now
    pub fn is_connection_active(&self, name: &str) -> bool {
        self.entry(name).is_some_and(|e| self.entry_is_active(&e))
    }

    /// Check the process (stdio) and round-trip a ping
    ///
    /// A failed check on an active connection downgrades it to `error`.
    pub async fn check_connection_health(&self, name: &str) -> Result<ConnectionHealth, ManagerError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| ManagerError::NotFound(name.to_string()))?;

        let process = if entry.transport.is_process_backed() {
            self.inner.processes.health_check(name).ok()
        } else {
            None
        };

        let mut ping_latency_ms = None;
        let mut error = None;
        let client = entry.current_client();
        let status = entry.state.read().status;

        if status == ConnectionStatus::Active {
            match &client {
                Some(client) if process.as_ref().is_some_and(|p| !p.alive) => {
                    let message = "process is not running".to_string();
                    entry.fail_session(client, message.clone());
                    error = Some(message);
                }
                Some(client) => {
                    let started = Instant::now();
                    match client.ping(self.inner.settings.ping_timeout).await {
                        Ok(()) => {
                            ping_latency_ms = Some(started.elapsed().as_millis() as u64);
                        }
                        Err(e) => {
                            let message = format!("ping failed: {}", e);
                            entry.fail_session(client, message.clone());
                            error = Some(message);
                        }
                    }
                }
                None => error = Some("no client".to_string()),
            }
        } else {
            error = entry.state.read().last_error.clone();
        }

        let status = entry.state.read().status;
        let healthy = status == ConnectionStatus::Active && ping_latency_ms.is_some();
        Ok(ConnectionHealth {
            name: name.to_string(),
            status,
            healthy,
            process,
            ping_latency_ms,
            error,
            checked_at: Utc::now(),
        })
    }

    /// Client for `name`, reconnecting once if it is not active
    async fn ready_client(&self, name: &str) -> Result<(Arc<Entry>, Arc<RpcClient>), ManagerError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| ManagerError::NotFound(name.to_string()))?;

        if !self.entry_is_active(&entry) {
            debug!("Connection '{}' not active, reconnecting", name);
            if !self.start_connection(name).await {
                let reason = entry
                    .state
                    .read()
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "connect failed".to_string());
                return Err(ManagerError::NotActive {
                    name: name.to_string(),
                    reason,
                });
            }
        }

        let client = entry.current_client().ok_or_else(|| ManagerError::NotActive {
            name: name.to_string(),
            reason: "connection was stopped".to_string(),
        })?;
        Ok((entry, client))
    }

    fn record_failure(entry: &Entry, client: &Arc<RpcClient>, error: &RpcError) {
        if matches!(error, RpcError::Transport(e) if e.is_fatal()) || matches!(error, RpcError::NotConnected) {
            entry.fail_session(client, error.to_string());
        }
    }

    /// Send a request over `name`
    pub async fn send_request(
        &self,
        name: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ManagerError> {
        let (entry, client) = self.ready_client(name).await?;
        match client.request(method, params, None).await {
            Ok(value) => {
                entry.counters.requests_ok.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Err(e) => {
                entry.counters.requests_failed.fetch_add(1, Ordering::Relaxed);
                Self::record_failure(&entry, &client, &e);
                Err(ManagerError::Rpc {
                    name: name.to_string(),
                    source: e,
                })
            }
        }
    }

    /// Send a notification over `name`
    pub async fn notify(&self, name: &str, method: &str, params: Option<Value>) -> Result<(), ManagerError> {
        let (entry, client) = self.ready_client(name).await?;
        match client.notify(method, params).await {
            Ok(()) => {
                entry.counters.notifications_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                Self::record_failure(&entry, &client, &e);
                Err(ManagerError::Rpc {
                    name: name.to_string(),
                    source: e,
                })
            }
        }
    }

    /// Notify every target concurrently; one failure never blocks the rest
    pub async fn notify_all(
        &self,
        targets: &[String],
        method: &str,
        params: Option<Value>,
    ) -> BTreeMap<String, Result<(), ManagerError>> {
        let sends = targets
            .iter()
            .map(|target| self.notify(target, method, params.clone()));
        let results = join_all(sends).await;
        targets.iter().cloned().zip(results).collect()
    }

    pub fn snapshot(&self, name: &str) -> Option<ConnectionSnapshot> {
        self.entry(name).map(|e| self.snapshot_of(&e))
    }

    /// Snapshots of every connection, sorted by name
    pub fn snapshots(&self) -> Vec<ConnectionSnapshot> {
        self.names()
            .iter()
            .filter_map(|name| self.snapshot(name))
            .collect()
    }

    fn snapshot_of(&self, entry: &Entry) -> ConnectionSnapshot {
        let state = entry.state.read().clone();
        let process = if entry.transport.is_process_backed() {
            self.inner.processes.snapshot(entry.name())
        } else {
            None
        };
        ConnectionSnapshot {
            name: entry.config.name.clone(),
            transport: entry.config.transport,
            endpoint: entry.config.endpoint_display(),
            enabled: entry.config.enabled,
            status: state.status,
            last_connected: state.last_connected,
            last_error: state.last_error,
            server: state.server.as_ref().map(|s| s.server_info.clone()),
            server_capabilities: state.server.map(|s| s.capabilities),
            requests_ok: entry.counters.requests_ok.load(Ordering::Relaxed),
            requests_failed: entry.counters.requests_failed.load(Ordering::Relaxed),
            notifications_sent: entry.counters.notifications_sent.load(Ordering::Relaxed),
            process,
        }
    }

    /// Health-check every active connection on each tick until cancelled
    ///
    /// Also marks a stdio connection as failed as soon as the supervisor
    /// reports an unrequested exit of its process.
    pub fn spawn_health_monitor(&self, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        let mut events = self.inner.processes.subscribe();
        tokio::spawn(async move {
            let mut ticker = Ticker::new(interval);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(ProcessEvent::Exited { name, code, requested: false }) => {
                            manager.mark_process_exit(&name, code);
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(n)) => debug!("Health monitor skipped {} process events", n),
                        Err(RecvError::Closed) => events = manager.inner.processes.subscribe(),
                    },
                    _ = ticker.tick() => manager.check_active().await,
                }
            }
            debug!("Health monitor stopped");
        })
    }

    fn mark_process_exit(&self, name: &str, code: Option<i32>) {
        let Some(entry) = self.entry(name) else {
            return;
        };
        if let Some(client) = entry.current_client() {
            let message = match code {
                Some(code) => format!("process exited with code {}", code),
                None => "process was killed by a signal".to_string(),
            };
            entry.fail_session(&client, message);
        }
    }

    async fn check_active(&self) {
        let active: Vec<String> = self
            .inner
            .entries
            .iter()
            .filter(|e| e.state.read().status == ConnectionStatus::Active)
            .map(|e| e.key().clone())
            .collect();

        let checks = active.iter().map(|name| self.check_connection_health(name));
        for result in join_all(checks).await.into_iter().flatten() {
            if !result.healthy {
                warn!(
                    "Connection '{}' unhealthy: {}",
                    result.name,
                    result.error.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    /// Stop every connection and then any remaining process
    pub async fn shutdown(&self) {
        let names = self.names();
        join_all(names.iter().map(|name| self.stop_connection(name))).await;
        self.inner
            .processes
            .shutdown_all(self.inner.processes.graceful_timeout())
            .await;
        info!("Connection manager shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportKind;

    fn manager() -> ConnectionManager {
        let settings = ManagerSettings::default()
            .with_connect_attempts(2, Duration::from_millis(10))
            .with_request_timeout(Duration::from_millis(500));
        ConnectionManager::new(settings, ProcessSupervisor::default())
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let manager = manager();
        manager
            .register(ConnectionConfig::http("remote", "http://127.0.0.1:9/rpc"))
            .unwrap();
        let err = manager
            .register(ConnectionConfig::http("remote", "http://127.0.0.1:9/other"))
            .unwrap_err();
        assert_eq!(err.error_code(), "CONNECTION_DUPLICATE");
    }

    #[test]
    fn test_register_requires_endpoint() {
        let manager = manager();
        let mut config = ConnectionConfig::websocket("ws", "ws://127.0.0.1:9");
        config.url = None;
        assert!(manager.register(config).is_err());
        assert!(manager.names().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_connection() {
        let manager = manager();
        assert!(!manager.start_connection("ghost").await);
        assert!(!manager.stop_connection("ghost").await);
        assert!(!manager.is_connection_active("ghost"));
        let err = manager.send_request("ghost", "ping", None).await.unwrap_err();
        assert_eq!(err.error_code(), "CONNECTION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_failed_connect_sets_error_status() {
        let manager = manager();
        manager
            .register(ConnectionConfig::http("remote", "http://127.0.0.1:9/rpc"))
            .unwrap();

        assert!(!manager.start_connection("remote").await);
        let snapshot = manager.snapshot("remote").unwrap();
        assert_eq!(snapshot.status, ConnectionStatus::Error);
        assert_eq!(snapshot.transport, TransportKind::Http);
        assert!(snapshot.last_error.unwrap().contains("handshake failed"));

        let err = manager.notify("remote", "notifications/message", None).await.unwrap_err();
        assert_eq!(err.error_code(), "CONNECTION_NOT_ACTIVE");

        assert!(manager.stop_connection("remote").await);
        let snapshot = manager.snapshot("remote").unwrap();
        assert_eq!(snapshot.status, ConnectionStatus::Inactive);
        assert!(snapshot.last_error.is_none());
    }

    #[tokio::test]
    async fn test_notify_all_reports_per_target() {
        let manager = manager();
        manager
            .register(ConnectionConfig::http("a", "http://127.0.0.1:9/rpc"))
            .unwrap();

        let targets = vec!["a".to_string(), "missing".to_string()];
        let results = manager.notify_all(&targets, "notifications/message", None).await;
        assert_eq!(results.len(), 2);
        assert_eq!(
            results["a"].as_ref().unwrap_err().error_code(),
            "CONNECTION_NOT_ACTIVE"
        );
        assert_eq!(
            results["missing"].as_ref().unwrap_err().error_code(),
            "CONNECTION_NOT_FOUND"
        );
    }

    #[tokio::test]
    async fn test_health_of_inactive_connection() {
        let manager = manager();
        manager
            .register(ConnectionConfig::http("remote", "http://127.0.0.1:9/rpc"))
            .unwrap();
        let health = manager.check_connection_health("remote").await.unwrap();
        assert!(!health.healthy);
        assert_eq!(health.status, ConnectionStatus::Inactive);
        assert!(health.process.is_none());
    }

    #[test]
    fn test_snapshots_sorted() {
        let manager = manager();
        for name in ["zeta", "alpha", "mid"] {
            manager
                .register(ConnectionConfig::http(name, "http://127.0.0.1:9/rpc"))
                .unwrap();
        }
        let names: Vec<String> = manager.snapshots().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }
}
