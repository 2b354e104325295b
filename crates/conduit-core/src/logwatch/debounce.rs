//! Suppression of repeated errors

use crate::clock::SharedClock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Entries kept before expired ones are pruned
const PRUNE_THRESHOLD: usize = 1024;

/// Remembers when each fingerprint was last emitted
///
/// The window starts at the first emission; repeats inside it are suppressed
/// and do not extend it.
pub struct Debouncer {
    window: Duration,
    clock: SharedClock,
    last_emitted: HashMap<String, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration, clock: SharedClock) -> Self {
        Self {
            window,
            clock,
            last_emitted: HashMap::new(),
        }
    }

    /// Whether an event with `fingerprint` should be emitted now
    pub fn admit(&mut self, fingerprint: &str) -> bool {
        let now = self.clock.now();
        if let Some(at) = self.last_emitted.get(fingerprint) {
            if now.saturating_duration_since(*at) < self.window {
                return false;
            }
        }

        if self.last_emitted.len() >= PRUNE_THRESHOLD {
            let window = self.window;
            self.last_emitted
                .retain(|_, at| now.saturating_duration_since(*at) < window);
        }
        self.last_emitted.insert(fingerprint.to_string(), now);
        true
    }

    pub fn tracked(&self) -> usize {
        self.last_emitted.len()
    }
}
