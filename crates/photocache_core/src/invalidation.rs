use chrono::{DateTime, Duration, Utc};

use crate::{CacheEntry, EntryState};

/// Decides whether a completed entry should be acquired again. Consulted
/// for `Done` entries on every tick.
pub trait InvalidationPolicy: Send + Sync {
    fn is_stale(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool;
}

/// Completed entries are kept forever.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverStale;

impl InvalidationPolicy for NeverStale {
    fn is_stale(&self, _entry: &CacheEntry, _now: DateTime<Utc>) -> bool {
        false
    }
}

/// Completed entries expire once they have been `Done` for longer than the
/// given age.
#[derive(Debug, Clone, Copy)]
pub struct MaxAge(pub Duration);

impl InvalidationPolicy for MaxAge {
    fn is_stale(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        entry.state == EntryState::Done && now - entry.status_changed_at > self.0
    }
}
