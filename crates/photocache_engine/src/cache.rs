use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use photocache_core::{
    advance, live_urls, owned_urls, CacheEntry, CacheOverview, Direction, Effect, EntryState,
    InvalidationPolicy, NeverStale, PageParser, Registry, StepContext, SubItem, SummaryFields,
    TransferKind, UrlScheme,
};
use photocache_logging::{cache_debug, cache_error, cache_info, cache_warn, set_tick};
use thiserror::Error;

use crate::persist::{load_snapshot, save_snapshot, PersistError};
use crate::queue::{DrainReport, QueueError, TransferQueue};
use crate::CacheSettings;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to persist cache snapshot: {0}")]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Notification of a change to the tracked entries, delivered after the
/// change has been made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    EntryAdded {
        key: String,
    },
    StateChanged {
        key: String,
        from: EntryState,
        to: EntryState,
    },
    EntryFailed {
        key: String,
        reason: String,
    },
    EntryRemoved {
        key: String,
    },
}

pub trait ChangeSink: Send + Sync {
    fn notify(&self, event: &CacheEvent);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Keys the registry reported that had no entry yet.
    pub discovered: usize,
    pub advanced: usize,
    /// Entries moved to `Error` during this tick.
    pub failed: usize,
    /// Entries neither `Done` nor `Error` once the tick finished.
    pub pending: usize,
    pub drain: DrainReport,
}

enum StepOutcome {
    Advanced,
    Idle,
    Failed,
}

/// One acquisition record per tracked key, advanced one step per tick.
pub struct AcquisitionCache {
    settings: CacheSettings,
    queue: Arc<TransferQueue>,
    registry: Arc<dyn Registry>,
    parser: Arc<dyn PageParser>,
    urls: Arc<dyn UrlScheme>,
    invalidation: Arc<dyn InvalidationPolicy>,
    sink: Option<Arc<dyn ChangeSink>>,
    entries: Mutex<BTreeMap<String, CacheEntry>>,
    save_lock: Mutex<()>,
    ticks: AtomicU64,
}

impl AcquisitionCache {
    pub fn new(
        settings: CacheSettings,
        queue: Arc<TransferQueue>,
        registry: Arc<dyn Registry>,
        parser: Arc<dyn PageParser>,
        urls: Arc<dyn UrlScheme>,
    ) -> Self {
        Self {
            settings,
            queue,
            registry,
            parser,
            urls,
            invalidation: Arc::new(NeverStale),
            sink: None,
            entries: Mutex::new(BTreeMap::new()),
            save_lock: Mutex::new(()),
            ticks: AtomicU64::new(0),
        }
    }

    /// Restores the cache snapshot; a missing or corrupt file starts empty.
    pub fn load(
        settings: CacheSettings,
        queue: Arc<TransferQueue>,
        registry: Arc<dyn Registry>,
        parser: Arc<dyn PageParser>,
        urls: Arc<dyn UrlScheme>,
    ) -> Result<Self, CacheError> {
        let stored: BTreeMap<String, CacheEntry> =
            load_snapshot(&settings.snapshot_file)?.unwrap_or_default();
        cache_info!(
            "Loaded {} cache entr(ies) from {:?}",
            stored.len(),
            settings.snapshot_file
        );
        let cache = Self::new(settings, queue, registry, parser, urls);
        *cache.lock_entries() = stored;
        Ok(cache)
    }

    pub fn with_invalidation(mut self, policy: Arc<dyn InvalidationPolicy>) -> Self {
        self.invalidation = policy;
        self
    }

    pub fn with_change_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn queue(&self) -> &Arc<TransferQueue> {
        &self.queue
    }

    /// Discovers new keys, advances every entry by at most one step, drains
    /// the queue and saves both snapshots.
    ///
    /// Per-entry failures never abort the tick. An error is returned only
    /// when a snapshot could not be written; the in-memory state is kept and
    /// the next tick saves again.
    pub async fn run_tick(&self) -> Result<TickReport, CacheError> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        set_tick(tick);
        let now = Utc::now();
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        let mut events = Vec::new();
        {
            let mut entries = self.lock_entries();
            report.discovered = self.discover(&mut entries, now, &mut events);
            self.expire_stale(&mut entries, now, &mut events);
            let keys: Vec<String> = entries.keys().cloned().collect();
            for key in keys {
                let Some(entry) = entries.get_mut(&key) else {
                    continue;
                };
                let (outcome, effects) = self.step(&key, entry, now, &mut events);
                self.apply(&key, &effects, &entries, now);
                match outcome {
                    StepOutcome::Advanced => report.advanced += 1,
                    StepOutcome::Failed => report.failed += 1,
                    StepOutcome::Idle => {}
                }
            }
        }
        self.emit(events);

        let mut first_error: Option<CacheError> = None;
        let queue_saved = match self.queue.drain().await {
            Ok(drain) => {
                let saved = drain.saved_snapshot();
                report.drain = drain;
                saved
            }
            Err(err) => {
                // The drain's own save is what failed.
                cache_error!("Queue drain could not persist: {}", err);
                first_error.get_or_insert(err.into());
                true
            }
        };
        if !queue_saved {
            if let Err(err) = self.queue.save() {
                cache_error!("Failed to save queue snapshot: {}", err);
                first_error.get_or_insert(err.into());
            }
        }
        if let Err(err) = self.save() {
            cache_error!("Failed to save cache snapshot: {}", err);
            first_error.get_or_insert(err);
        }

        report.pending = self.overview().pending();
        cache_info!(
            "Tick finished: {} discovered, {} advanced, {} failed, {} pending, {} transfer(s)",
            report.discovered,
            report.advanced,
            report.failed,
            report.pending,
            report.drain.attempted
        );
        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Completed sub-items; empty until the entry is `Done`.
    pub fn sub_items_for_key(&self, key: &str) -> Vec<SubItem> {
        self.lock_entries()
            .get(key)
            .map(|entry| entry.completed_sub_items().to_vec())
            .unwrap_or_default()
    }

    pub fn summary_fields(&self, key: &str) -> Option<SummaryFields> {
        self.lock_entries()
            .get(key)
            .and_then(|entry| entry.summary.clone())
    }

    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.lock_entries().get(key).cloned()
    }

    pub fn entries(&self) -> BTreeMap<String, CacheEntry> {
        self.lock_entries().clone()
    }

    pub fn overview(&self) -> CacheOverview {
        CacheOverview::from_entries(self.lock_entries().values())
    }

    pub fn has_pending_work(&self) -> bool {
        self.overview().pending() > 0
    }

    /// Drops the entry and every queue item it owns that no other entry still
    /// needs. A key still listed by the registry is rediscovered as `New` on
    /// the next tick.
    pub fn remove_key(&self, key: &str) -> Result<bool, CacheError> {
        {
            let mut entries = self.lock_entries();
            let Some(entry) = entries.remove(key) else {
                return Ok(false);
            };
            self.release(key, &entry, &entries);
        }
        cache_info!("Removed entry {}", key);
        self.emit(vec![CacheEvent::EntryRemoved {
            key: key.to_string(),
        }]);
        self.persist_all()?;
        Ok(true)
    }

    pub fn remove_all(&self) -> Result<usize, CacheError> {
        let removed = std::mem::take(&mut *self.lock_entries());
        for (key, entry) in &removed {
            self.release(key, entry, &BTreeMap::new());
        }
        let events = removed
            .keys()
            .map(|key| CacheEvent::EntryRemoved { key: key.clone() })
            .collect();
        self.emit(events);
        cache_info!("Removed all {} entr(ies)", removed.len());
        self.persist_all()?;
        Ok(removed.len())
    }

    /// Operator remediation: restarts an `Error` entry from `New`. Entries in
    /// any other state are left alone.
    pub fn reset_key(&self, key: &str) -> Result<bool, CacheError> {
        let now = Utc::now();
        {
            let mut entries = self.lock_entries();
            let old = match entries.get_mut(key) {
                Some(entry) if entry.state == EntryState::Error => {
                    let fresh = CacheEntry::new(entry.remote_id.clone(), now);
                    std::mem::replace(entry, fresh)
                }
                _ => return Ok(false),
            };
            self.release(key, &old, &entries);
        }
        cache_info!("Reset entry {} to New", key);
        self.emit(vec![CacheEvent::StateChanged {
            key: key.to_string(),
            from: EntryState::Error,
            to: EntryState::New,
        }]);
        self.persist_all()?;
        Ok(true)
    }

    pub fn save(&self) -> Result<(), CacheError> {
        let _save = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = self.entries();
        save_snapshot(&self.settings.snapshot_file, &entries)?;
        Ok(())
    }

    fn persist_all(&self) -> Result<(), CacheError> {
        self.queue.save()?;
        self.save()
    }

    fn lock_entries(&self) -> MutexGuard<'_, BTreeMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn discover(
        &self,
        entries: &mut BTreeMap<String, CacheEntry>,
        now: DateTime<Utc>,
        events: &mut Vec<CacheEvent>,
    ) -> usize {
        let mut discovered = 0;
        for tracked in self.registry.tracked_keys() {
            if entries.contains_key(&tracked.key) {
                continue;
            }
            cache_debug!("Tracking new key {} ({})", tracked.key, tracked.remote_id);
            entries.insert(
                tracked.key.clone(),
                CacheEntry::new(tracked.remote_id, now),
            );
            events.push(CacheEvent::EntryAdded { key: tracked.key });
            discovered += 1;
        }
        discovered
    }

    fn expire_stale(
        &self,
        entries: &mut BTreeMap<String, CacheEntry>,
        now: DateTime<Utc>,
        events: &mut Vec<CacheEvent>,
    ) {
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| {
                entry.state == EntryState::Done && self.invalidation.is_stale(entry, now)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            let Some(entry) = entries.get_mut(&key) else {
                continue;
            };
            cache_info!("Entry {} is stale; acquiring it again", key);
            let fresh = CacheEntry::new(entry.remote_id.clone(), now);
            let old = std::mem::replace(entry, fresh);
            self.release(&key, &old, entries);
            events.push(CacheEvent::StateChanged {
                key,
                from: EntryState::Done,
                to: EntryState::New,
            });
        }
    }

    fn step(
        &self,
        key: &str,
        entry: &mut CacheEntry,
        now: DateTime<Utc>,
        events: &mut Vec<CacheEvent>,
    ) -> (StepOutcome, Vec<Effect>) {
        if entry.state.is_terminal() {
            return (StepOutcome::Idle, Vec::new());
        }
        let ctx = StepContext {
            queue: &*self.queue,
            payloads: &*self.queue,
            parser: self.parser.as_ref(),
            urls: self.urls.as_ref(),
            now,
        };
        match advance(entry, &ctx) {
            Ok(step) => {
                if !step.advanced() {
                    return (StepOutcome::Idle, step.effects);
                }
                cache_debug!("{}: {} -> {}", key, step.from, step.to);
                events.push(CacheEvent::StateChanged {
                    key: key.to_string(),
                    from: step.from,
                    to: step.to,
                });
                (StepOutcome::Advanced, step.effects)
            }
            Err(err) if err.is_fatal() => {
                cache_error!("Entry {} failed in {}: {}", key, entry.state, err);
                let reason = err.to_string();
                entry.fail(reason.clone(), now);
                events.push(CacheEvent::EntryFailed {
                    key: key.to_string(),
                    reason,
                });
                (StepOutcome::Failed, Vec::new())
            }
            Err(err) => {
                cache_warn!("Entry {} stays in {}: {}", key, entry.state, err);
                (StepOutcome::Idle, Vec::new())
            }
        }
    }

    /// Applies one entry's effects. Removals of urls another entry still
    /// depends on are skipped; the last entry to finish with a url removes it.
    fn apply(
        &self,
        key: &str,
        effects: &[Effect],
        entries: &BTreeMap<String, CacheEntry>,
        now: DateTime<Utc>,
    ) {
        for effect in effects {
            match effect {
                Effect::Enqueue {
                    kind,
                    url,
                    priority,
                } => {
                    let folder = match kind {
                        TransferKind::Page => &self.settings.page_folder,
                        TransferKind::File => &self.settings.file_folder,
                    };
                    self.queue
                        .insert_if_absent(Direction::Download, *kind, url, folder, *priority, now);
                }
                Effect::Remove { url } => {
                    if self.needed_elsewhere(key, url, entries) {
                        cache_debug!("{}: keeping {} for another entry", key, url);
                    } else {
                        self.queue.remove_quiet(url);
                    }
                }
            }
        }
    }

    /// Removes the queue items a dropped or restarted entry owned. `entries`
    /// may still hold `key`; that slot is not consulted.
    fn release(&self, key: &str, released: &CacheEntry, entries: &BTreeMap<String, CacheEntry>) {
        for url in owned_urls(released, self.urls.as_ref()) {
            if self.needed_elsewhere(key, &url, entries) {
                cache_debug!("{}: keeping {} for another entry", key, url);
                continue;
            }
            self.queue.remove_quiet(&url);
        }
    }

    fn needed_elsewhere(
        &self,
        key: &str,
        url: &str,
        entries: &BTreeMap<String, CacheEntry>,
    ) -> bool {
        entries
            .iter()
            .filter(|(other, _)| other.as_str() != key)
            .any(|(_, entry)| {
                live_urls(entry, self.urls.as_ref())
                    .iter()
                    .any(|live| live == url)
            })
    }

    fn emit(&self, events: Vec<CacheEvent>) {
        let Some(sink) = &self.sink else {
            return;
        };
        for event in &events {
            sink.notify(event);
        }
    }
}
