//! Event debouncing: the debounce ledger and the creation-shadow map.
//!
//! Both maps are shared by every notification thread of one watcher role and
//! are guarded by their own mutex, since each check is a read followed by a
//! write. Entries older than `retention_factor * max(window, shadow)` are
//! swept lazily so a long-running session does not grow without bound.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::daemon::queue::FsEventKind;

/// Ledger key: event kind, normalized source path and optional destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub kind: FsEventKind,
    pub path: PathBuf,
    pub dest: Option<PathBuf>,
}

impl EventKey {
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self { kind, path: path.into(), dest: None }
    }

    pub fn moved(src: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self { kind: FsEventKind::Moved, path: src.into(), dest: Some(dest.into()) }
    }
}

/// Debounce timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceSettings {
    /// An identical event is accepted again only after this much time
    pub window: Duration,
    /// A `modified` event this soon after an accepted `created` is dropped
    pub creation_shadow: Duration,
    /// Multiple of the longer duration after which entries are evicted
    pub retention_factor: u32,
}

impl Default for DebounceSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            creation_shadow: Duration::from_secs(1),
            retention_factor: 10,
        }
    }
}

impl DebounceSettings {
    /// Saturates instead of overflowing for very long windows.
    fn retention(&self) -> Duration {
        self.window
            .max(self.creation_shadow)
            .checked_mul(self.retention_factor.max(1))
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Debug)]
struct TimedMap<K> {
    entries: HashMap<K, Instant>,
    last_sweep: Option<Instant>,
}

impl<K: std::hash::Hash + Eq> TimedMap<K> {
    fn new() -> Self {
        Self { entries: HashMap::new(), last_sweep: None }
    }

    fn sweep(&mut self, now: Instant, retention: Duration) {
        let due = match self.last_sweep {
            Some(last) => now.saturating_duration_since(last) >= retention,
            None => true,
        };
        if !due {
            return;
        }
        self.entries
            .retain(|_, seen| now.saturating_duration_since(*seen) <= retention);
        self.last_sweep = Some(now);
    }
}

/// Decides whether a raw notification duplicates a recently accepted one.
#[derive(Debug)]
pub struct EventDeduplicator {
    settings: DebounceSettings,
    ledger: Mutex<TimedMap<EventKey>>,
    created: Mutex<TimedMap<PathBuf>>,
}

impl EventDeduplicator {
    pub fn new(settings: DebounceSettings) -> Self {
        Self {
            settings,
            ledger: Mutex::new(TimedMap::new()),
            created: Mutex::new(TimedMap::new()),
        }
    }

    /// Accepts `key` and refreshes its ledger entry iff it was never seen or
    /// was last accepted more than one window before `now`.
    pub fn should_process_at(&self, key: &EventKey, now: Instant) -> bool {
        let mut ledger = self.ledger.lock();
        ledger.sweep(now, self.settings.retention());

        let accept = match ledger.entries.get(key) {
            Some(last) => now.saturating_duration_since(*last) > self.settings.window,
            None => true,
        };
        if accept {
            ledger.entries.insert(key.clone(), now);
        }
        accept
    }

    /// Remembers an accepted `created` event for the shadow rule.
    pub fn record_created_at(&self, path: &Path, now: Instant) {
        let mut created = self.created.lock();
        created.sweep(now, self.settings.retention());
        created.entries.insert(path.to_path_buf(), now);
    }

    /// True if a `created` event for `path` was accepted within the shadow window.
    pub fn is_creation_shadowed_at(&self, path: &Path, now: Instant) -> bool {
        let created = self.created.lock();
        match created.entries.get(path) {
            Some(at) => now.saturating_duration_since(*at) <= self.settings.creation_shadow,
            None => false,
        }
    }

    pub fn ledger_len(&self) -> usize {
        self.ledger.lock().entries.len()
    }

    pub fn shadow_len(&self) -> usize {
        self.created.lock().entries.len()
    }
}

impl Default for EventDeduplicator {
    fn default() -> Self {
        Self::new(DebounceSettings::default())
    }
}
