use std::path::PathBuf;
use std::time::Duration;

use crate::FetchSettings;

pub const QUEUE_SNAPSHOT_FILE: &str = "queue.json";
pub const CACHE_SNAPSHOT_FILE: &str = "cache.json";
pub const PAGE_FOLDER: &str = "pages";
pub const FILE_FOLDER: &str = "files";

#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Directory every `local_file_ref` is relative to.
    pub root_dir: PathBuf,
    pub snapshot_file: PathBuf,
    /// Simultaneous transfers during a drain. The remote sites this was
    /// built for tolerate a single connection, hence the default of 1.
    pub concurrency: usize,
}

impl QueueSettings {
    pub fn with_root(root_dir: PathBuf) -> Self {
        Self {
            snapshot_file: root_dir.join(QUEUE_SNAPSHOT_FILE),
            root_dir,
            concurrency: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub snapshot_file: PathBuf,
    pub page_folder: String,
    pub file_folder: String,
}

impl CacheSettings {
    pub fn with_root(root_dir: &std::path::Path) -> Self {
        Self {
            snapshot_file: root_dir.join(CACHE_SNAPSHOT_FILE),
            page_folder: PAGE_FOLDER.to_string(),
            file_folder: FILE_FOLDER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// Delay between ticks once every entry is `Done` or `Error`.
    pub normal_interval: Duration,
    /// Delay between ticks while work is outstanding.
    pub busy_interval: Duration,
    /// How long shutdown waits for an in-flight tick.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            normal_interval: Duration::from_secs(15 * 60),
            busy_interval: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub fetch: FetchSettings,
    pub queue: QueueSettings,
    pub cache: CacheSettings,
    pub scheduler: SchedulerSettings,
}

impl EngineConfig {
    /// All state lives under `root`: both snapshots plus the page and file
    /// folders.
    pub fn default_with_root(root: PathBuf) -> Self {
        Self {
            fetch: FetchSettings::default(),
            cache: CacheSettings::with_root(&root),
            queue: QueueSettings::with_root(root),
            scheduler: SchedulerSettings::default(),
        }
    }
}
