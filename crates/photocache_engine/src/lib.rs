//! Photocache engine: everything that touches the network or the disk.
//!
//! The [`TransferQueue`] owns all HTTP traffic, the [`AcquisitionCache`]
//! runs the per-entity pipeline from `photocache_core` and applies its queue
//! effects, and the [`Scheduler`] drives both on a timer.
mod cache;
mod config;
mod connectivity;
mod decode;
mod fetch;
mod filename;
mod parser;
mod persist;
mod queue;
mod scheduler;
mod types;

pub use cache::{AcquisitionCache, CacheError, CacheEvent, ChangeSink, TickReport};
pub use config::{
    CacheSettings, EngineConfig, QueueSettings, SchedulerSettings, CACHE_SNAPSHOT_FILE,
    FILE_FOLDER, PAGE_FOLDER, QUEUE_SNAPSHOT_FILE,
};
pub use connectivity::{AlwaysOnline, Connectivity, ConnectivityFlag};
pub use decode::{decode_page, DecodeError, PageText};
pub use fetch::{FetchSettings, ReqwestTransport, Transport};
pub use filename::cache_file_name;
pub use parser::{ParserSelectors, SelectorError, SelectorPageParser};
pub use persist::{ensure_dir, load_snapshot, save_snapshot, AtomicFileWriter, PersistError};
pub use queue::{DrainReport, DrainSkip, QueueError, TransferError, TransferQueue};
pub use scheduler::{Scheduler, SchedulerHandle, ShutdownOutcome};
pub use types::{FailureKind, FetchError, FetchMetadata, FetchOutput};
