use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use photocache_core::{
    Direction, PayloadStore, Priority, QueueLookup, TransferItem, TransferKind, TransferStatus,
};
use photocache_logging::{cache_debug, cache_info, cache_warn};
use thiserror::Error;

use crate::decode::{decode_page, DecodeError};
use crate::filename::cache_file_name;
use crate::persist::{load_snapshot, save_snapshot, AtomicFileWriter, PersistError};
use crate::{Connectivity, FetchError, QueueSettings, Transport};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to persist transfer queue: {0}")]
    Persist(#[from] PersistError),
}

/// Why one transfer failed. Never aborts the rest of a drain.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("cannot store payload: {0}")]
    Persist(#[from] PersistError),
    #[error("cannot read upload body: {0}")]
    Io(#[from] io::Error),
    #[error("payload task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainSkip {
    Offline,
    Busy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: Option<DrainSkip>,
}

impl DrainReport {
    fn skipped(reason: DrainSkip) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }

    /// Whether the drain wrote the queue snapshot itself. Skipped and empty
    /// drains leave saving to the caller.
    pub fn saved_snapshot(&self) -> bool {
        self.skipped.is_none() && self.attempted > 0
    }
}

/// The sole path for network I/O: a deduplicated list of transfers drained
/// under a concurrency cap.
pub struct TransferQueue {
    settings: QueueSettings,
    writer: AtomicFileWriter,
    transport: Arc<dyn Transport>,
    connectivity: Arc<dyn Connectivity>,
    items: Mutex<Vec<TransferItem>>,
    save_lock: Mutex<()>,
    draining: AtomicBool,
}

impl TransferQueue {
    pub fn new(
        settings: QueueSettings,
        transport: Arc<dyn Transport>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            writer: AtomicFileWriter::new(settings.root_dir.clone()),
            settings,
            transport,
            connectivity,
            items: Mutex::new(Vec::new()),
            save_lock: Mutex::new(()),
            draining: AtomicBool::new(false),
        }
    }

    /// Restores the queue snapshot. Transfers interrupted mid-drain go back
    /// to `Required`.
    pub fn load(
        settings: QueueSettings,
        transport: Arc<dyn Transport>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Result<Self, QueueError> {
        let stored: Vec<TransferItem> = load_snapshot(&settings.snapshot_file)?.unwrap_or_default();
        let now = Utc::now();
        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(stored.len());
        for mut item in stored {
            if !seen.insert(item.url.clone()) {
                cache_warn!("Dropping duplicate queue entry for {}", item.url);
                continue;
            }
            if item.status == TransferStatus::Requested {
                item.set_status(TransferStatus::Required, now);
            }
            items.push(item);
        }
        cache_info!(
            "Loaded {} transfer(s) from {:?}",
            items.len(),
            settings.snapshot_file
        );

        let queue = Self::new(settings, transport, connectivity);
        *queue.lock_items() = items;
        Ok(queue)
    }

    pub fn root(&self) -> &Path {
        &self.settings.root_dir
    }

    /// Schedules a download unless one for `url` already exists, in which
    /// case the existing item is returned unchanged.
    pub fn enqueue_if_absent(
        &self,
        kind: TransferKind,
        url: &str,
        destination_folder: &str,
        priority: Priority,
    ) -> Result<TransferItem, QueueError> {
        let (item, created) = self.insert_if_absent(
            Direction::Download,
            kind,
            url,
            destination_folder,
            priority,
            Utc::now(),
        );
        if created {
            self.save()?;
        }
        Ok(item)
    }

    /// Schedules a POST of the text stored at `local_file_ref`.
    pub fn enqueue_upload_if_absent(
        &self,
        url: &str,
        local_file_ref: &str,
        priority: Priority,
    ) -> Result<TransferItem, QueueError> {
        let created = {
            let mut items = self.lock_items();
            match items.iter().find(|item| item.url == url) {
                Some(existing) => return Ok(existing.clone()),
                None => {
                    let item = TransferItem::new(
                        Direction::Upload,
                        TransferKind::Page,
                        url,
                        local_file_ref,
                        priority,
                        Utc::now(),
                    );
                    items.push(item.clone());
                    item
                }
            }
        };
        cache_debug!("Enqueued upload {}", url);
        self.save()?;
        Ok(created)
    }

    /// Bookkeeping-only insert used inside a tick; the tick persists once at
    /// the end.
    pub(crate) fn insert_if_absent(
        &self,
        direction: Direction,
        kind: TransferKind,
        url: &str,
        destination_folder: &str,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> (TransferItem, bool) {
        let mut items = self.lock_items();
        if let Some(existing) = items.iter().find(|item| item.url == url) {
            return (existing.clone(), false);
        }
        let local_file_ref = format!("{destination_folder}/{}", cache_file_name(kind, url));
        let item = TransferItem::new(direction, kind, url, local_file_ref, priority, now);
        items.push(item.clone());
        cache_debug!("Enqueued {:?} {}", kind, url);
        (item, true)
    }

    pub fn find(&self, url: &str) -> Option<TransferItem> {
        self.lock_items().iter().find(|item| item.url == url).cloned()
    }

    pub fn items(&self) -> Vec<TransferItem> {
        self.lock_items().clone()
    }

    pub fn len(&self) -> usize {
        self.lock_items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_items().is_empty()
    }

    /// Drops the item for `url` and deletes its payload file. Returns whether
    /// an item existed.
    pub fn remove(&self, url: &str) -> Result<bool, QueueError> {
        let removed = self.remove_quiet(url);
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub(crate) fn remove_quiet(&self, url: &str) -> bool {
        let removed = {
            let mut items = self.lock_items();
            let Some(index) = items.iter().position(|item| item.url == url) else {
                return false;
            };
            items.remove(index)
        };
        self.delete_payload(&removed.local_file_ref);
        cache_debug!("Removed transfer {}", url);
        true
    }

    /// Removes every item, or only those with `filter` status.
    pub fn remove_all(&self, filter: Option<TransferStatus>) -> Result<usize, QueueError> {
        let removed: Vec<TransferItem> = {
            let mut items = self.lock_items();
            let (drop, keep): (Vec<_>, Vec<_>) = items
                .drain(..)
                .partition(|item| filter.is_none_or(|status| item.status == status));
            *items = keep;
            drop
        };
        for item in &removed {
            self.delete_payload(&item.local_file_ref);
        }
        if !removed.is_empty() {
            self.save()?;
        }
        Ok(removed.len())
    }

    /// Explicit retry: puts one item back to `Required`.
    pub fn reset_to_required(&self, url: &str) -> Result<bool, QueueError> {
        let changed = {
            let mut items = self.lock_items();
            match items.iter_mut().find(|item| item.url == url) {
                Some(item) => item.set_status(TransferStatus::Required, Utc::now()),
                None => false,
            }
        };
        if changed {
            self.save()?;
        }
        Ok(changed)
    }

    /// Explicit retry of every `Failed` item.
    pub fn retry_failed(&self) -> Result<usize, QueueError> {
        let now = Utc::now();
        let count = self
            .lock_items()
            .iter_mut()
            .filter(|item| item.status == TransferStatus::Failed)
            .map(|item| item.set_status(TransferStatus::Required, now))
            .filter(|changed| *changed)
            .count();
        if count > 0 {
            cache_info!("Reset {} failed transfer(s) for retry", count);
            self.save()?;
        }
        Ok(count)
    }

    /// Performs every `Required` transfer, at most `concurrency` at a time.
    ///
    /// A no-op while offline or while another drain is running. Individual
    /// failures mark their item `Failed` and never abort the batch; the
    /// snapshot is saved once every transfer has finished.
    pub async fn drain(&self) -> Result<DrainReport, QueueError> {
        if !self.connectivity.is_online() {
            cache_debug!("Drain skipped: offline");
            return Ok(DrainReport::skipped(DrainSkip::Offline));
        }
        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            cache_debug!("Drain skipped: another drain is running");
            return Ok(DrainReport::skipped(DrainSkip::Busy));
        };

        let batch = self.claim_required(Utc::now());
        let mut report = DrainReport {
            attempted: batch.len(),
            ..DrainReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        let concurrency = self.settings.concurrency.max(1);
        let mut outcomes = stream::iter(batch)
            .map(|item| async move {
                let outcome = self.transfer(&item).await;
                (item, outcome)
            })
            .buffer_unordered(concurrency);

        while let Some((item, outcome)) = outcomes.next().await {
            match outcome {
                Ok(status) => {
                    report.succeeded += 1;
                    self.complete(&item, status);
                }
                Err(err) => {
                    report.failed += 1;
                    cache_warn!("Transfer of {} failed: {}", item.url, err);
                    self.complete(&item, TransferStatus::Failed);
                }
            }
        }
        drop(outcomes);

        cache_info!(
            "Drain finished: {} attempted, {} succeeded, {} failed",
            report.attempted,
            report.succeeded,
            report.failed
        );
        self.save()?;
        Ok(report)
    }

    pub fn save(&self) -> Result<(), QueueError> {
        let _save = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let items = self.items();
        save_snapshot(&self.settings.snapshot_file, &items)?;
        Ok(())
    }

    fn lock_items(&self) -> MutexGuard<'_, Vec<TransferItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks every `Required` item `Requested` and returns them, highest
    /// priority first, oldest first within a priority.
    fn claim_required(&self, now: DateTime<Utc>) -> Vec<TransferItem> {
        let mut claimed: Vec<TransferItem> = self
            .lock_items()
            .iter_mut()
            .filter(|item| item.status == TransferStatus::Required)
            .map(|item| {
                item.set_status(TransferStatus::Requested, now);
                item.clone()
            })
            .collect();
        claimed.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        claimed
    }

    async fn transfer(&self, item: &TransferItem) -> Result<TransferStatus, TransferError> {
        match item.direction {
            Direction::Download => {
                let output = self.transport.get(&item.url).await?;
                let body = match item.kind {
                    TransferKind::Page => {
                        decode_page(&output.bytes, output.metadata.content_type.as_deref())?
                            .text
                            .into_bytes()
                    }
                    TransferKind::File => output.bytes,
                };
                let writer = self.writer.clone();
                let relative = item.local_file_ref.clone();
                tokio::task::spawn_blocking(move || writer.write(&relative, &body)).await??;
                cache_info!(
                    "Downloaded {} ({} bytes)",
                    item.url,
                    output.metadata.byte_len
                );
                Ok(TransferStatus::Downloaded)
            }
            Direction::Upload => {
                let path = self.path_of(&item.local_file_ref);
                let body = tokio::task::spawn_blocking(move || std::fs::read_to_string(path)).await??;
                self.transport.post(&item.url, body).await?;
                cache_info!("Uploaded {}", item.url);
                Ok(TransferStatus::Uploaded)
            }
        }
    }

    fn complete(&self, finished: &TransferItem, status: TransferStatus) {
        let now = Utc::now();
        let mut items = self.lock_items();
        match items.iter_mut().find(|item| item.url == finished.url) {
            Some(item) => {
                item.set_status(status, now);
            }
            None => {
                drop(items);
                cache_debug!(
                    "{} was removed while in flight; discarding its payload",
                    finished.url
                );
                if finished.direction == Direction::Download {
                    self.delete_payload(&finished.local_file_ref);
                }
            }
        }
    }

    fn delete_payload(&self, local_file_ref: &str) {
        let path = self.path_of(local_file_ref);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                cache_warn!("Cached payload {:?} was already missing", path);
            }
            Err(err) => cache_warn!("Failed to delete cached payload {:?}: {}", path, err),
        }
    }
}

impl QueueLookup for TransferQueue {
    fn find(&self, url: &str) -> Option<TransferItem> {
        TransferQueue::find(self, url)
    }
}

impl PayloadStore for TransferQueue {
    fn path_of(&self, local_file_ref: &str) -> PathBuf {
        self.settings.root_dir.join(local_file_ref)
    }
}

/// Holds the single drain slot; released on drop.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
