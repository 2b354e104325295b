//! Shared helpers for integration tests

#![allow(dead_code)]

use conduit_core::config::ConnectionConfig;
use conduit_core::manager::{ConnectionManager, ManagerSettings};
use conduit_core::supervisor::ProcessSupervisor;
use std::time::Duration;

/// Line-oriented JSON-RPC server in POSIX sh
///
/// Answers `initialize` with a handshake result and every other request with
/// `{"echo":true}`; notifications are ignored.
pub const ECHO_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"echo","version":"1.0"}}}\n' "$id"
      ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"echo":true}}\n' "$id"
      ;;
  esac
done
"#;

pub fn echo_connection(name: &str) -> ConnectionConfig {
    ConnectionConfig::stdio(name, "sh", vec!["-c".to_string(), ECHO_SERVER.to_string()])
}

pub fn manager() -> ConnectionManager {
    let settings = ManagerSettings::default()
        .with_connect_attempts(2, Duration::from_millis(50))
        .with_request_timeout(Duration::from_secs(5));
    ConnectionManager::new(settings, ProcessSupervisor::default())
}

/// Poll `check` until it holds or `limit` elapses
pub async fn eventually<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
