//! One-shot connectivity test

use crate::console::CliConsole;
use conduit_core::admin::{AdminService, Target};
use conduit_core::config::ConduitConfig;
use conduit_core::manager::ConnectionManager;

/// Connect, ping and report; returns whether every connection passed
pub async fn test(config: &ConduitConfig, name: Option<String>, console: &CliConsole) -> anyhow::Result<bool> {
    let manager = ConnectionManager::from_config(config)?;
    let admin = AdminService::new(manager.clone());
    let target = Target::from(name);

    let report = admin.test(&target).await;
    manager.shutdown().await;

    console.report("Connection test", &report)?;
    Ok(!report.items.is_empty() && report.all_succeeded())
}
