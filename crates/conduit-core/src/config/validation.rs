//! Configuration validation

use super::{ConduitConfig, ConnectionConfig, TransportKind};
use crate::error::{ConduitError, ConduitResult};
use std::collections::HashSet;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate a complete configuration
    ///
    /// Returns non-fatal warnings on success.
    pub fn validate(config: &ConduitConfig) -> ConduitResult<Vec<String>> {
        Self::validate_connections(config)?;
        Self::validate_limits(config)?;
        Ok(Self::forwarder_warnings(config))
    }

    fn validate_connections(config: &ConduitConfig) -> ConduitResult<()> {
        let mut seen = HashSet::new();
        for connection in &config.connections {
            if connection.name.trim().is_empty() {
                return Err(ConduitError::config("Connection name cannot be empty"));
            }
            if !seen.insert(connection.name.as_str()) {
                return Err(ConduitError::config(format!(
                    "Duplicate connection name '{}'",
                    connection.name
                )));
            }
            Self::validate_endpoint(connection)?;
        }
        Ok(())
    }

    fn validate_endpoint(connection: &ConnectionConfig) -> ConduitResult<()> {
        let context = format!("connection '{}'", connection.name);
        match connection.transport {
            TransportKind::Stdio => {
                if connection
                    .command
                    .as_deref()
                    .is_none_or(|c| c.trim().is_empty())
                {
                    return Err(ConduitError::config_with_context(
                        "stdio transport requires 'command'",
                        context,
                    ));
                }
            }
            TransportKind::Http | TransportKind::Websocket => {
                let schemes: &[&str] = if connection.transport == TransportKind::Http {
                    &["http", "https"]
                } else {
                    &["ws", "wss"]
                };
                let raw = connection.url.as_deref().ok_or_else(|| {
                    ConduitError::config_with_context(
                        format!("{} transport requires 'url'", connection.transport),
                        context.clone(),
                    )
                })?;
                let url = reqwest::Url::parse(raw).map_err(|e| {
                    ConduitError::config_with_context(format!("Invalid url '{}': {}", raw, e), context.clone())
                })?;
                if !schemes.contains(&url.scheme()) {
                    return Err(ConduitError::config_with_context(
                        format!(
                            "url scheme '{}' does not match {} transport (expected {})",
                            url.scheme(),
                            connection.transport,
                            schemes.join(" or ")
                        ),
                        context,
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_limits(config: &ConduitConfig) -> ConduitResult<()> {
        if config.runtime.connect_attempts == 0 {
            return Err(ConduitError::config("runtime.connect_attempts must be at least 1"));
        }
        if config.runtime.request_timeout_secs == 0 {
            return Err(ConduitError::config("runtime.request_timeout_secs must be positive"));
        }
        if config.supervisor.restart.multiplier < 1.0 {
            return Err(ConduitError::config(
                "supervisor.restart.multiplier must be at least 1.0",
            ));
        }
        if let Some(watcher) = &config.watcher {
            if watcher.path.as_os_str().is_empty() {
                return Err(ConduitError::config("watcher.path cannot be empty"));
            }
            if watcher.max_block_lines == 0 || watcher.channel_capacity == 0 {
                return Err(ConduitError::config(
                    "watcher.max_block_lines and watcher.channel_capacity must be positive",
                ));
            }
            if watcher.poll_interval_ms == 0 {
                return Err(ConduitError::config("watcher.poll_interval_ms must be positive"));
            }
        }
        Ok(())
    }

    fn forwarder_warnings(config: &ConduitConfig) -> Vec<String> {
        config
            .forwarder
            .targets
            .iter()
            .filter(|target| config.connection(target).is_none())
            .map(|target| format!("Forwarder target '{}' is not a configured connection", target))
            .collect()
    }
}
