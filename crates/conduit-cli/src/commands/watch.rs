//! Live log classification without forwarding

use crate::console::CliConsole;
use crate::signal_handler::SignalHandler;
use anyhow::Context;
use colored::*;
use conduit_core::config::{ConduitConfig, WatcherConfig};
use conduit_core::logwatch::{ErrorEvent, LogWatcher, Severity};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn print_event(event: &ErrorEvent) {
    let label = format!("[{}]", event.severity);
    let label = match event.severity {
        Severity::Critical => label.red().bold(),
        Severity::Error => label.red(),
        Severity::Warning => label.yellow(),
        Severity::Notice => label.blue(),
    };
    let location = event
        .location
        .as_ref()
        .map(|l| format!(" ({}:{})", l.file, l.line))
        .unwrap_or_default();
    println!(
        "{} {} {} {}{}",
        event.detected_at.format("%H:%M:%S").to_string().dimmed(),
        label,
        event.kind.as_str().bold(),
        event.message,
        location.dimmed()
    );
    for line in event.block.iter().skip(1) {
        println!("    {}", line.dimmed());
    }
    if event.truncated_lines > 0 {
        println!("    {}", format!("... {} more lines", event.truncated_lines).dimmed());
    }
}

pub async fn watch(
    config: &ConduitConfig,
    path: PathBuf,
    from_start: bool,
    console: &CliConsole,
) -> anyhow::Result<bool> {
    let base = config.watcher.clone().unwrap_or_default();
    let watcher = WatcherConfig {
        path,
        start_at_end: !from_start,
        ..base
    };

    let token = CancellationToken::new();
    let _signals = SignalHandler::install(token.clone()).context("failed to install signal handler")?;
    let handle = LogWatcher::new(watcher.clone()).spawn(token.clone()).await?;
    let (mut events, task) = handle.into_parts();
    if !console.is_json() {
        console.print_header(&format!("Watching {}", watcher.path.display()));
    }

    // The channel closes once the watcher has flushed and stopped.
    while let Some(event) = events.recv().await {
        if console.is_json() {
            console.json_line(&event)?;
        } else {
            print_event(&event);
        }
    }

    let stats = task.join().await;
    info!(
        "Watched {} lines: {} events, {} suppressed, {} rotations",
        stats.lines, stats.emitted, stats.suppressed, stats.rotations
    );
    Ok(true)
}
