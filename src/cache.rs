use std::{collections::HashMap, sync::Mutex, time::Duration};

use tokio::time::Instant;
use tracing::debug;

struct CacheEntry {
    body: String,
    captured: Instant,
}

/// Process-wide playlist cache: at most one entry per stream identifier,
/// overwritten on every successful resolution. Whole-entry replacement under
/// one mutex keeps per-key reads and overwrites atomic.
pub struct ManifestCache {
    freshness: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ManifestCache {
    #[must_use]
    pub fn new(freshness: Duration) -> Self {
        Self {
            freshness,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached body only while its age is within the freshness
    /// window. Expired entries are left in place; the next successful
    /// resolution overwrites them.
    #[must_use]
    pub fn get_fresh(&self, identifier: &str) -> Option<String> {
        let entries = self.entries.lock().expect("manifest cache poisoned");
        let entry = entries.get(identifier)?;
        if entry.captured.elapsed() < self.freshness {
            Some(entry.body.clone())
        } else {
            debug!("cache entry for {identifier} has expired");
            None
        }
    }

    pub fn put(&self, identifier: &str, body: String) {
        let mut entries = self.entries.lock().expect("manifest cache poisoned");
        entries.insert(
            identifier.to_string(),
            CacheEntry {
                body,
                captured: Instant::now(),
            },
        );
    }
}
