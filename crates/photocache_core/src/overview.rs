use std::collections::BTreeMap;

use crate::{CacheEntry, EntryState};

/// Point-in-time counts of entries per pipeline state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheOverview {
    pub total: usize,
    pub by_state: BTreeMap<EntryState, usize>,
}

impl CacheOverview {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a CacheEntry>) -> Self {
        let mut overview = Self::default();
        for entry in entries {
            overview.total += 1;
            *overview.by_state.entry(entry.state).or_default() += 1;
        }
        overview
    }

    pub fn count(&self, state: EntryState) -> usize {
        self.by_state.get(&state).copied().unwrap_or(0)
    }

    /// Entries still moving through the pipeline.
    pub fn pending(&self) -> usize {
        self.total - self.count(EntryState::Done) - self.count(EntryState::Error)
    }
}
