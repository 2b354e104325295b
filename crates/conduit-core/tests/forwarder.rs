//! Log errors forwarded to live connections

#![cfg(unix)]

mod common;

use common::{echo_connection, eventually, manager};
use conduit_core::config::{ConnectionConfig, ForwarderConfig, WatcherConfig};
use conduit_core::forwarder::NotificationForwarder;
use conduit_core::logwatch::{BlockAssembler, LogWatcher};
use conduit_core::manager::ConnectionManager;
use std::fs::OpenOptions;
use std::io::Write;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn forwarder(targets: &[&str]) -> (ConnectionManager, NotificationForwarder) {
    let manager = manager();
    manager.register(echo_connection("editor")).unwrap();
    manager
        .register(ConnectionConfig::http("offline", "http://127.0.0.1:9/rpc"))
        .unwrap();
    let config = ForwarderConfig {
        targets: targets.iter().map(|t| t.to_string()).collect(),
        ..ForwarderConfig::default()
    };
    (manager.clone(), NotificationForwarder::new(manager, config))
}

#[tokio::test]
async fn test_one_failing_target_does_not_block_others() {
    let (_, forwarder) = forwarder(&["editor", "offline", "missing"]);
    let mut assembler = BlockAssembler::new(10);
    assembler.push("[2026-10-16 10:00:00] production.ERROR: order sync failed");
    let event = assembler.flush().unwrap();

    let report = forwarder.forward(&event).await;
    assert!(report.forwarded);
    assert_eq!(report.delivered(), 1);
    assert!(report.results["editor"].is_ok());

    let failed: Vec<(&String, &str)> = report
        .failed()
        .map(|(name, e)| (name, e.error_code()))
        .collect();
    assert_eq!(failed.len(), 2);
    assert!(failed.contains(&(&"missing".to_string(), "CONNECTION_NOT_FOUND")));
    assert!(failed.iter().any(|(name, _)| name.as_str() == "offline"));
}

#[tokio::test]
async fn test_watcher_feeds_forwarder() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("laravel.log");
    std::fs::write(&path, "").unwrap();

    let token = CancellationToken::new();
    let watcher = WatcherConfig {
        poll_interval_ms: 20,
        ..WatcherConfig::new(&path)
    };
    let handle = LogWatcher::new(watcher).spawn(token.clone()).await.unwrap();
    let (events, task) = handle.into_parts();

    let (manager, forwarder) = forwarder(&["editor"]);
    let run = {
        let token = token.clone();
        tokio::spawn(async move { forwarder.run(events, token).await })
    };

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    writeln!(file, "[2026-10-16 10:00:00] production.WARNING: slow query").unwrap();
    writeln!(file, "[2026-10-16 10:00:01] production.CRITICAL: queue worker crashed").unwrap();
    file.flush().unwrap();

    let delivered = eventually(Duration::from_secs(5), || {
        manager
            .snapshot("editor")
            .is_some_and(|s| s.notifications_sent == 1)
    })
    .await;
    assert!(delivered, "notification never reached the editor connection");
    assert_eq!(task.stats().emitted, 2);
    token.cancel();

    let stats = run.await.unwrap();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.filtered, 1);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.failed, 0);
    task.join().await;
    manager.shutdown().await;
}
