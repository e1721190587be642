//! Short-window duplicate-burst suppression.
//!
//! Keyed by `host:issue_type`; an entry within the window marks repeat
//! failures as duplicate bursts so the alert engine can emit a cheap marker
//! instead of re-running the full alert flow. Stale entries are evicted on
//! access.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

pub struct DebounceCache {
    window: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl DebounceCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(host: &str, issue_type: &str) -> String {
        format!("{host}:{issue_type}")
    }

    /// True when the key last fired within the window.
    pub fn is_duplicate(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries.retain(|_, stamp| now.duration_since(*stamp) < self.window);
        entries.contains_key(key)
    }

    /// Records a fresh alert for the key.
    pub fn mark(&self, key: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), Instant::now());
    }
}

impl Default for DebounceCache {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
