//! File-based configuration loading

use super::ConduitConfig;
use crate::error::{ConduitError, ConduitResult};
use std::fs;
use std::path::Path;

/// Load configuration from a file
///
/// Supports JSON, TOML, and YAML formats based on file extension.
/// Returns default config if file doesn't exist.
pub fn load_from_file(path: &Path) -> ConduitResult<ConduitConfig> {
    if !path.exists() {
        return Ok(ConduitConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        ConduitError::config_with_context(
            format!("Failed to read config file: {}", e),
            format!("Reading configuration from '{}'", path.display()),
        )
    })?;

    parse(&content, path)
}

fn parse(content: &str, path: &Path) -> ConduitResult<ConduitConfig> {
    let config = match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => toml::from_str(content).map_err(|e| {
            ConduitError::config_with_context(
                format!("Failed to parse TOML config: {}", e),
                format!("Deserializing TOML configuration from '{}'", path.display()),
            )
        })?,
        Some("yaml") | Some("yml") => serde_yaml::from_str(content).map_err(|e| {
            ConduitError::config_with_context(
                format!("Failed to parse YAML config: {}", e),
                format!("Deserializing YAML configuration from '{}'", path.display()),
            )
        })?,
        _ => serde_json::from_str(content).map_err(|e| {
            ConduitError::config_with_context(
                format!("Failed to parse JSON config: {}", e),
                format!("Deserializing JSON configuration from '{}'", path.display()),
            )
        })?,
    };

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Auth, TransportKind};
    use crate::logwatch::Severity;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_json_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("conduit.json");
        let config_json = r#"{
            "logging": {"level": "debug", "format": "json"},
            "connections": [
                {"name": "local", "transport": "stdio", "command": "node", "args": ["server.js"]},
                {"name": "remote", "transport": "http", "url": "https://example.test/rpc",
                 "auth": {"type": "bearer", "token": "t"}}
            ],
            "forwarder": {"targets": ["local"], "min_severity": "warning"}
        }"#;
        fs::write(&config_path, config_json).unwrap();

        let config = load_from_file(&config_path).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.connections.len(), 2);
        assert_eq!(config.connections[1].transport, TransportKind::Http);
        assert!(matches!(config.connections[1].auth, Auth::Bearer { .. }));
        assert_eq!(config.forwarder.min_severity, Severity::Warning);
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("conduit.toml");
        let config_toml = r#"
[runtime]
request_timeout_secs = 10

[supervisor.restart]
enabled = true
max_restarts = 5

[[connections]]
name = "assistant"
transport = "websocket"
url = "wss://example.test/socket"

[watcher]
path = "/var/log/app/error.log"
debounce_secs = 30
"#;
        fs::write(&config_path, config_toml).unwrap();

        let config = load_from_file(&config_path).unwrap();
        assert_eq!(config.runtime.request_timeout_secs, 10);
        assert!(config.supervisor.restart.enabled);
        assert_eq!(config.supervisor.restart.max_restarts, 5);
        assert_eq!(config.connections[0].transport, TransportKind::Websocket);
        assert_eq!(config.watcher.unwrap().debounce_secs, 30);
    }

    #[test]
    fn test_load_from_yaml_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("conduit.yml");
        let config_yaml = r#"
connections:
  - name: local
    transport: stdio
    command: ./server
    auto_restart: true
runtime:
  connect_attempts: 1
"#;
        fs::write(&config_path, config_yaml).unwrap();

        let config = load_from_file(&config_path).unwrap();
        assert_eq!(config.runtime.connect_attempts, 1);
        assert_eq!(config.connections[0].auto_restart, Some(true));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = load_from_file(Path::new("/nonexistent/conduit.json")).unwrap();
        assert_eq!(config, ConduitConfig::default());
    }

    #[test]
    fn test_invalid_content_reports_context() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("broken.toml");
        fs::write(&config_path, "connections = [ {").unwrap();

        let err = load_from_file(&config_path).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG");
        assert!(err.context().unwrap().contains("broken.toml"));
    }
}
