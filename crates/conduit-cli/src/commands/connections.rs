//! Configured connection listing

use crate::console::CliConsole;
use colored::*;
use conduit_core::config::ConduitConfig;
use conduit_core::manager::ConnectionManager;

pub async fn list(config: &ConduitConfig, console: &CliConsole) -> anyhow::Result<bool> {
    let manager = ConnectionManager::from_config(config)?;
    let snapshots = manager.snapshots();

    if console.is_json() {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
        return Ok(true);
    }

    if snapshots.is_empty() {
        println!("No connections configured.");
        println!("\nAdd a [[connections]] entry to the configuration file, e.g.:");
        println!("  [[connections]]");
        println!("  name = \"editor\"");
        println!("  transport = \"stdio\"");
        println!("  command = \"my-assistant\"");
        return Ok(true);
    }

    console.print_header("Configured connections");
    for snapshot in &snapshots {
        let enabled = if snapshot.enabled {
            "enabled".green()
        } else {
            "disabled".dimmed()
        };
        println!(
            "  {} ({}) - {} [{}]",
            snapshot.name.bold(),
            snapshot.transport,
            snapshot.endpoint,
            enabled
        );
    }
    if let Some(watcher) = &config.watcher {
        println!();
        println!("Watching {}", watcher.path.display());
        if !config.forwarder.targets.is_empty() {
            println!(
                "Forwarding {}+ errors to {}",
                config.forwarder.min_severity,
                config.forwarder.targets.join(", ")
            );
        }
    }
    Ok(true)
}
