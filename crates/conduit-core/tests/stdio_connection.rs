//! End-to-end tests of stdio connections against a shell JSON-RPC server

#![cfg(unix)]

mod common;

use common::{echo_connection, eventually, manager};
use conduit_core::config::ConnectionConfig;
use conduit_core::manager::{ConnectionManager, ConnectionStatus, ManagerSettings};
use conduit_core::supervisor::{ProcessState, ProcessSupervisor, RestartPolicy};
use futures::future::join_all;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn pid_of(manager: &ConnectionManager, name: &str) -> u32 {
    manager
        .processes()
        .snapshot(name)
        .and_then(|s| s.pid)
        .expect("process should have a pid")
}

fn signal(pid: u32, sig: Option<Signal>) -> nix::Result<()> {
    kill(Pid::from_raw(pid as i32), sig)
}

#[tokio::test]
async fn test_request_roundtrip_and_stop() {
    let manager = manager();
    manager.register(echo_connection("echo")).unwrap();

    assert!(manager.start_connection("echo").await);
    assert!(manager.is_connection_active("echo"));

    let result = manager
        .send_request("echo", "tools/list", Some(json!({"cursor": null})))
        .await
        .unwrap();
    assert_eq!(result, json!({"echo": true}));
    manager
        .notify("echo", "notifications/message", Some(json!({"level": "info"})))
        .await
        .unwrap();

    let snapshot = manager.snapshot("echo").unwrap();
    assert_eq!(snapshot.status, ConnectionStatus::Active);
    assert_eq!(snapshot.server.unwrap().name, "echo");
    assert!(snapshot.server_capabilities.unwrap()["tools"].is_object());
    assert_eq!(snapshot.requests_ok, 1);
    assert_eq!(snapshot.notifications_sent, 1);
    assert!(snapshot.last_connected.is_some());

    let health = manager.check_connection_health("echo").await.unwrap();
    assert!(health.healthy, "unhealthy: {:?}", health.error);
    assert!(health.process.unwrap().alive);

    let pid = pid_of(&manager, "echo");
    assert!(manager.stop_connection("echo").await);
    assert!(!manager.is_connection_active("echo"));
    assert_eq!(manager.snapshot("echo").unwrap().status, ConnectionStatus::Inactive);
    assert_eq!(
        manager.processes().snapshot("echo").unwrap().state,
        ProcessState::Stopped
    );
    assert_eq!(signal(pid, None), Err(nix::errno::Errno::ESRCH));
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let manager = manager();
    manager.register(echo_connection("echo")).unwrap();

    assert!(manager.start_connection("echo").await);
    let first = pid_of(&manager, "echo");
    let results = join_all((0..3).map(|_| manager.start_connection("echo"))).await;
    assert!(results.into_iter().all(|ok| ok));

    assert_eq!(pid_of(&manager, "echo"), first);
    assert_eq!(manager.processes().snapshots().len(), 1);
    assert_eq!(manager.processes().snapshot("echo").unwrap().restart_count, 0);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_requests_all_answered() {
    let manager = manager();
    manager.register(echo_connection("echo")).unwrap();
    assert!(manager.start_connection("echo").await);

    let requests = (0..10).map(|i| manager.send_request("echo", "tools/call", Some(json!({"n": i}))));
    let results = join_all(requests).await;
    assert!(results.iter().all(|r| r.as_ref().is_ok_and(|v| v["echo"] == true)));
    assert_eq!(manager.snapshot("echo").unwrap().requests_ok, 10);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_external_kill_is_detected_and_recovered_lazily() {
    let manager = manager();
    manager.register(echo_connection("echo")).unwrap();
    assert!(manager.start_connection("echo").await);
    let pid = pid_of(&manager, "echo");

    signal(pid, Some(Signal::SIGKILL)).unwrap();
    assert!(
        eventually(Duration::from_secs(5), || !manager.is_connection_active("echo")).await,
        "kill was not noticed"
    );
    assert_eq!(
        manager.processes().snapshot("echo").unwrap().state,
        ProcessState::Died
    );

    let health = manager.check_connection_health("echo").await.unwrap();
    assert!(!health.healthy);
    assert_eq!(health.status, ConnectionStatus::Error);

    let result = manager.send_request("echo", "tools/list", None).await.unwrap();
    assert_eq!(result["echo"], true);
    assert_ne!(pid_of(&manager, "echo"), pid);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_health_monitor_marks_killed_process() {
    let manager = manager();
    manager.register(echo_connection("echo")).unwrap();
    assert!(manager.start_connection("echo").await);
    let pid = pid_of(&manager, "echo");

    let token = CancellationToken::new();
    let monitor = manager.spawn_health_monitor(Duration::from_millis(100), token.clone());
    signal(pid, Some(Signal::SIGKILL)).unwrap();

    assert!(
        eventually(Duration::from_secs(1), || {
            manager
                .snapshot("echo")
                .is_some_and(|s| s.status == ConnectionStatus::Error)
        })
        .await,
        "monitor did not flag the dead process: {:?}",
        manager.snapshot("echo").map(|s| s.status)
    );
    let snapshot = manager.snapshot("echo").unwrap();
    assert!(snapshot.last_error.is_some());

    // Later ticks leave a failed connection alone
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(manager.snapshot("echo").unwrap().status, ConnectionStatus::Error);
    assert!(!manager.processes().is_running("echo"));

    token.cancel();
    monitor.await.unwrap();
    manager.shutdown().await;
}

#[tokio::test]
async fn test_auto_restart_reattaches_connection() {
    let settings = ManagerSettings::default()
        .with_connect_attempts(3, Duration::from_millis(100))
        .with_restart(RestartPolicy::default().with_initial_backoff(Duration::from_millis(50)));
    let manager = ConnectionManager::new(settings, ProcessSupervisor::default());
    manager
        .register(echo_connection("echo").with_auto_restart(true))
        .unwrap();
    assert!(manager.start_connection("echo").await);
    let pid = pid_of(&manager, "echo");

    signal(pid, Some(Signal::SIGKILL)).unwrap();
    let processes = manager.processes().clone();
    assert!(
        eventually(Duration::from_secs(5), || {
            processes
                .snapshot("echo")
                .is_some_and(|s| s.state == ProcessState::Running && s.pid != Some(pid))
        })
        .await,
        "process was not restarted"
    );

    let result = manager.send_request("echo", "tools/list", None).await.unwrap();
    assert_eq!(result["echo"], true);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_handshake_failure_marks_error() {
    let manager = manager();
    let silent = ConnectionConfig::stdio("silent", "sh", vec!["-c".into(), "cat > /dev/null".into()])
        .with_timeout(1);
    manager.register(silent).unwrap();

    assert!(!manager.start_connection("silent").await);
    let snapshot = manager.snapshot("silent").unwrap();
    assert_eq!(snapshot.status, ConnectionStatus::Error);
    assert!(snapshot.last_error.unwrap().contains("handshake failed"));
    assert!(!manager.processes().is_running("silent"));
}
