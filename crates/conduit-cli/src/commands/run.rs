//! Long-running mode: keep connections up and forward log errors

use crate::console::CliConsole;
use crate::signal_handler::SignalHandler;
use anyhow::Context;
use conduit_core::admin::{AdminService, Target};
use conduit_core::config::{ConduitConfig, WatcherConfig};
use conduit_core::forwarder::NotificationForwarder;
use conduit_core::logwatch::LogWatcher;
use conduit_core::manager::ConnectionManager;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn run(
    mut config: ConduitConfig,
    watch: Option<PathBuf>,
    notify: Vec<String>,
    console: &CliConsole,
) -> anyhow::Result<bool> {
    let overridden = watch.is_some() || !notify.is_empty();
    if let Some(path) = watch {
        let watcher = config.watcher.take().unwrap_or_default();
        config.watcher = Some(WatcherConfig { path, ..watcher });
    }
    if !notify.is_empty() {
        config.forwarder.targets = notify;
    }
    if overridden {
        for warning in config.validate()? {
            warn!("{}", warning);
        }
    }

    let token = CancellationToken::new();
    let _signals = SignalHandler::install(token.clone()).context("failed to install signal handler")?;

    let manager = ConnectionManager::from_config(&config)?;
    let admin = AdminService::new(manager.clone());
    let started = admin.start(&Target::All).await;
    console.report("Connections", &started)?;
    if !started.all_succeeded() {
        console.warn("Some connections failed to start; they are retried on first use");
    }

    let monitor = manager.spawn_health_monitor(config.runtime.health_interval(), token.child_token());

    let mut forwarding = None;
    if let Some(watcher) = config.watcher.clone() {
        if config.forwarder.targets.is_empty() {
            console.warn("Watching without notification targets; errors are only logged");
        }
        let handle = LogWatcher::new(watcher).spawn(token.child_token()).await?;
        let (events, task) = handle.into_parts();
        let forwarder = NotificationForwarder::new(manager.clone(), config.forwarder.clone());
        // The forwarder drains until the watcher closes the channel.
        let drain = CancellationToken::new();
        let forward = tokio::spawn(async move { forwarder.run(events, drain).await });
        forwarding = Some((task, forward));
    }

    info!("Running; press Ctrl+C to stop");
    token.cancelled().await;

    if let Some((task, forward)) = forwarding {
        let watched = task.join().await;
        info!(
            "Log watcher stopped: {} lines, {} events, {} suppressed, {} dropped",
            watched.lines, watched.emitted, watched.suppressed, watched.dropped
        );
        match forward.await {
            Ok(stats) => info!(
                "Forwarder stopped: {} received, {} filtered, {} delivered, {} failed",
                stats.received, stats.filtered, stats.delivered, stats.failed
            ),
            Err(e) => warn!("Forwarder task failed: {}", e),
        }
    }
    if let Err(e) = monitor.await {
        warn!("Health monitor task failed: {}", e);
    }

    manager.shutdown().await;
    if !console.is_json() {
        console.success("Shut down cleanly");
    }
    Ok(true)
}
