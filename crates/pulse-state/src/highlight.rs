//! Highlight scheduler - transient "recently changed" windows per entity
//!
//! Each key holds at most one expiry. Re-marking a key replaces its expiry
//! rather than stacking a second window. Expired entries are removed
//! lazily on lookup and eagerly by `sweep`.
//!
//! Time is `tokio::time::Instant` so paused-clock tests drive expiry.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use pulse_core::EntityKey;

/// Default highlight window
pub const DEFAULT_HIGHLIGHT_WINDOW: Duration = Duration::from_millis(2000);

/// One active highlight
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HighlightEntry {
    pub entity_key: EntityKey,
    pub expires_at: Instant,
}

/// Highlight scheduler
#[derive(Debug)]
pub struct HighlightScheduler {
    window: Duration,
    entries: Mutex<HashMap<EntityKey, Instant>>,
}

impl HighlightScheduler {
    pub fn new(window: Duration) -> Self {
        HighlightScheduler {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Open or restart the window for `key`. Returns the new expiry.
    pub fn mark(&self, key: &EntityKey) -> Instant {
        self.mark_at(key, Instant::now())
    }

    pub fn mark_at(&self, key: &EntityKey, now: Instant) -> Instant {
        let expires_at = now + self.window;
        self.entries.lock().insert(key.clone(), expires_at);
        expires_at
    }

    pub fn is_highlighted(&self, key: &EntityKey) -> bool {
        self.is_highlighted_at(key, Instant::now())
    }

    pub fn is_highlighted_at(&self, key: &EntityKey, now: Instant) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(expires_at) if *expires_at > now => true,
            Some(_) => {
                entries.remove(key);
                false
            }
            None => false,
        }
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        before - entries.len()
    }

    /// Currently highlighted entries, soonest expiry first
    pub fn active(&self) -> Vec<HighlightEntry> {
        self.active_at(Instant::now())
    }

    pub fn active_at(&self, now: Instant) -> Vec<HighlightEntry> {
        let mut active: Vec<_> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, expires_at)| **expires_at > now)
            .map(|(key, expires_at)| HighlightEntry {
                entity_key: key.clone(),
                expires_at: *expires_at,
            })
            .collect();
        active.sort_by_key(|e| e.expires_at);
        active
    }

    /// Entries held, including any not yet swept
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for HighlightScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_HIGHLIGHT_WINDOW)
    }
}
