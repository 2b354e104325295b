//! Environment variable-based configuration overrides
//!
//! Recognised variables (all optional):
//! `CONDUIT_LOG_LEVEL`, `CONDUIT_LOG_FORMAT`, `CONDUIT_REQUEST_TIMEOUT_SECS`,
//! `CONDUIT_WATCH_PATH` and `CONDUIT_NOTIFY_TARGETS` (comma separated).

use super::{ConduitConfig, WatcherConfig};
use crate::error::{ConduitError, ConduitResult};
use std::env;
use std::path::PathBuf;

pub const LOG_LEVEL: &str = "CONDUIT_LOG_LEVEL";
pub const LOG_FORMAT: &str = "CONDUIT_LOG_FORMAT";
pub const REQUEST_TIMEOUT_SECS: &str = "CONDUIT_REQUEST_TIMEOUT_SECS";
pub const WATCH_PATH: &str = "CONDUIT_WATCH_PATH";
pub const NOTIFY_TARGETS: &str = "CONDUIT_NOTIFY_TARGETS";

/// Apply overrides from the process environment
pub fn apply_env_overrides(config: &mut ConduitConfig) -> ConduitResult<()> {
    apply_env_overrides_from(config, |key| env::var(key).ok())
}

/// Apply overrides using `lookup` to resolve variables
pub fn apply_env_overrides_from<F>(config: &mut ConduitConfig, lookup: F) -> ConduitResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(level) = lookup(LOG_LEVEL) {
        config.logging.level = level;
    }

    if let Some(format) = lookup(LOG_FORMAT) {
        config.logging.format = format;
    }

    if let Some(timeout) = lookup(REQUEST_TIMEOUT_SECS) {
        config.runtime.request_timeout_secs = timeout.trim().parse().map_err(|_| {
            ConduitError::config_with_context(
                format!("Invalid {} value", REQUEST_TIMEOUT_SECS),
                format!("Parsing request timeout '{}'", timeout),
            )
        })?;
    }

    if let Some(path) = lookup(WATCH_PATH).filter(|p| !p.trim().is_empty()) {
        let path = PathBuf::from(path.trim());
        match config.watcher.as_mut() {
            Some(watcher) => watcher.path = path,
            None => config.watcher = Some(WatcherConfig::new(path)),
        }
    }

    if let Some(targets) = lookup(NOTIFY_TARGETS) {
        config.forwarder.targets = targets
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_overrides_applied() {
        let mut config = ConduitConfig::default();
        apply_env_overrides_from(
            &mut config,
            lookup(&[
                (LOG_LEVEL, "trace"),
                (REQUEST_TIMEOUT_SECS, "7"),
                (WATCH_PATH, "/tmp/app.log"),
                (NOTIFY_TARGETS, "a, b,,c "),
            ]),
        )
        .unwrap();

        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.runtime.request_timeout_secs, 7);
        assert_eq!(config.watcher.unwrap().path, PathBuf::from("/tmp/app.log"));
        assert_eq!(config.forwarder.targets, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_watch_path_keeps_other_watcher_settings() {
        let mut config = ConduitConfig::default();
        config.watcher = Some(WatcherConfig {
            debounce_secs: 5,
            ..WatcherConfig::new("/old.log")
        });
        apply_env_overrides_from(&mut config, lookup(&[(WATCH_PATH, "/new.log")])).unwrap();

        let watcher = config.watcher.unwrap();
        assert_eq!(watcher.path, PathBuf::from("/new.log"));
        assert_eq!(watcher.debounce_secs, 5);
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let mut config = ConduitConfig::default();
        let err = apply_env_overrides_from(&mut config, lookup(&[(REQUEST_TIMEOUT_SECS, "soon")]))
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFIG");
    }
}
