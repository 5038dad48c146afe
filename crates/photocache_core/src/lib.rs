//! Photocache core: data model and the per-entity acquisition state machine.
//!
//! Nothing in this crate performs network I/O or writes files. Pipeline steps
//! read the queue and cached payloads through traits and hand back the queue
//! mutations they need as [`Effect`]s.
mod advance;
mod effect;
mod entry;
mod hash;
mod invalidation;
mod overview;
mod parse;
mod registry;
mod transfer;
mod urls;

pub use advance::{
    advance, content_hash, live_urls, owned_urls, PayloadStore, QueueLookup, Step, StepContext,
    StepError,
};
pub use effect::Effect;
pub use entry::{CacheEntry, EntryState, SubItem, SummaryFields, TransitionError};
pub use hash::ContentHasher;
pub use invalidation::{InvalidationPolicy, MaxAge, NeverStale};
pub use overview::CacheOverview;
pub use parse::{PageParser, ParseError, ParsedPage};
pub use registry::{Registry, StaticRegistry, TrackedKey};
pub use transfer::{
    Direction, Priority, TransferItem, TransferKind, TransferStatus, PRIORITY_ENTRY_PAGE,
    PRIORITY_PAGED_PAGE, PRIORITY_SUB_ITEM, PRIORITY_UPLOAD,
};
pub use urls::{TemplateUrls, UrlScheme};
