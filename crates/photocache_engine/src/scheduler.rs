use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use photocache_logging::{cache_debug, cache_error, cache_info, cache_warn};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{AcquisitionCache, CacheError, TickReport};
use crate::SchedulerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Clean,
    /// The in-flight tick outlived the grace period and was aborted.
    TimedOut,
}

/// Drives [`AcquisitionCache::run_tick`] on a timer that speeds up while
/// entries are still moving through the pipeline.
pub struct Scheduler {
    cache: Arc<AcquisitionCache>,
    settings: SchedulerSettings,
    running: AtomicBool,
    busy: AtomicBool,
    wake: Notify,
}

impl Scheduler {
    pub fn new(cache: Arc<AcquisitionCache>, settings: SchedulerSettings) -> Self {
        Self {
            cache,
            settings,
            running: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn cache(&self) -> &Arc<AcquisitionCache> {
        &self.cache
    }

    /// Runs one tick unless another is already in progress, in which case
    /// the request is dropped and `None` returned.
    pub async fn run_tick(&self) -> Option<Result<TickReport, CacheError>> {
        let Some(_guard) = TickGuard::acquire(&self.running) else {
            cache_debug!("Tick skipped: previous tick still running");
            self.busy.store(true, Ordering::Relaxed);
            return None;
        };
        let result = self.cache.run_tick().await;
        let pending = match &result {
            Ok(report) => report.pending > 0,
            Err(_) => self.cache.has_pending_work(),
        };
        self.busy.store(pending, Ordering::Relaxed);
        Some(result)
    }

    /// Wakes the loop so the next tick starts now instead of after the
    /// current delay.
    pub fn request_tick(&self) {
        self.wake.notify_one();
    }

    pub fn next_delay(&self) -> Duration {
        if self.busy.load(Ordering::Relaxed) {
            self.settings.busy_interval
        } else {
            self.settings.normal_interval
        }
    }

    /// Starts the tick loop on the tokio runtime. The first tick runs
    /// immediately.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let token = CancellationToken::new();
        let grace = self.settings.shutdown_grace;
        let looping = Arc::clone(&self);
        let cancelled = token.clone();
        let task = tokio::spawn(async move { looping.run_loop(cancelled).await });
        SchedulerHandle {
            scheduler: self,
            token,
            task,
            grace,
        }
    }

    async fn run_loop(&self, token: CancellationToken) {
        cache_info!(
            "Scheduler started: normal interval {:?}, busy interval {:?}",
            self.settings.normal_interval,
            self.settings.busy_interval
        );
        while !token.is_cancelled() {
            // A started tick always runs to completion; cancellation is only
            // observed between ticks.
            if let Some(Err(err)) = self.run_tick().await {
                cache_error!("Tick did not persist its state: {}", err);
            }

            let delay = self.next_delay();
            cache_debug!("Next tick in {:?}", delay);
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => cache_debug!("Tick requested"),
            }
        }
        cache_info!("Scheduler stopped");
    }
}

/// Owns the spawned loop. Dropping the handle leaves the loop running; call
/// [`SchedulerHandle::shutdown`] to stop it.
pub struct SchedulerHandle {
    scheduler: Arc<Scheduler>,
    token: CancellationToken,
    task: JoinHandle<()>,
    grace: Duration,
}

impl SchedulerHandle {
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn request_tick(&self) {
        self.scheduler.request_tick();
    }

    /// Stops the loop, waiting up to the grace period for an in-flight tick.
    pub async fn shutdown(self) -> ShutdownOutcome {
        self.token.cancel();
        let mut task = self.task;
        match tokio::time::timeout(self.grace, &mut task).await {
            Ok(Ok(())) => ShutdownOutcome::Clean,
            Ok(Err(err)) => {
                cache_error!("Scheduler task ended abnormally: {}", err);
                ShutdownOutcome::Clean
            }
            Err(_) => {
                cache_warn!(
                    "In-flight tick did not finish within {:?}; aborting it",
                    self.grace
                );
                task.abort();
                ShutdownOutcome::TimedOut
            }
        }
    }
}

struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
