use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::hash::ContentHasher;
use crate::{
    CacheEntry, Effect, EntryState, PageParser, ParseError, SubItem, TransferItem, TransferKind,
    TransferStatus, TransitionError, UrlScheme, PRIORITY_ENTRY_PAGE, PRIORITY_PAGED_PAGE,
    PRIORITY_SUB_ITEM,
};

/// Read access to the transfer queue.
pub trait QueueLookup {
    fn find(&self, url: &str) -> Option<TransferItem>;
}

/// Maps queue-relative file references to cached payloads.
pub trait PayloadStore {
    fn path_of(&self, local_file_ref: &str) -> PathBuf;

    fn read(&self, local_file_ref: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.path_of(local_file_ref))
    }
}

/// Everything a single step may consult.
pub struct StepContext<'a> {
    pub queue: &'a dyn QueueLookup,
    pub payloads: &'a dyn PayloadStore,
    pub parser: &'a dyn PageParser,
    pub urls: &'a dyn UrlScheme,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("queue item for {url} is missing")]
    MissingQueueItem { url: String },
    #[error("expected {expected} sub-items, found {actual}")]
    SubItemCountMismatch { expected: u32, actual: usize },
    #[error("expected sub-item count is unset")]
    MissingExpectedCount,
    #[error("cannot parse {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: ParseError,
    },
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("cannot read payload {local_ref}: {source}")]
    Payload {
        local_ref: String,
        #[source]
        source: io::Error,
    },
}

impl StepError {
    /// Fatal errors park the entry in `Error`; the rest are retried on the
    /// next tick. A downloaded payload whose file is gone is as inconsistent
    /// as a missing queue item, so only other I/O failures are retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            StepError::Payload { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => true,
        }
    }
}

/// Result of one step: the state before and after, plus the queue effects to
/// apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub from: EntryState,
    pub to: EntryState,
    pub effects: Vec<Effect>,
}

impl Step {
    pub fn advanced(&self) -> bool {
        self.from != self.to
    }
}

enum Poll {
    Ready(TransferItem),
    Pending,
}

/// Executes the one step matching the entry's current state.
///
/// The entry is only modified when the step succeeds; on error it is left
/// exactly as it was so the caller can decide between parking it in `Error`
/// and retrying.
pub fn advance(entry: &mut CacheEntry, ctx: &StepContext<'_>) -> Result<Step, StepError> {
    let from = entry.state;
    let mut next = entry.clone();
    let mut effects = Vec::new();

    match from {
        EntryState::New | EntryState::RequestingFirstPage => {
            let url = ctx.urls.first_page_url(&next.remote_id);
            effects.push(Effect::enqueue(TransferKind::Page, url, PRIORITY_ENTRY_PAGE));
            next.transition(EntryState::WaitingFirstPage, ctx.now)?;
        }
        EntryState::WaitingFirstPage => {
            let url = ctx.urls.first_page_url(&next.remote_id);
            if let Poll::Ready(_) = poll(ctx, &url)? {
                next.transition(EntryState::ParsingFirstPage, ctx.now)?;
            }
        }
        EntryState::ParsingFirstPage => {
            let url = ctx.urls.first_page_url(&next.remote_id);
            if let Poll::Ready(item) = poll(ctx, &url)? {
                let parsed = parse_page(ctx, &item)?;
                let count = parsed.expected_page_count.ok_or_else(|| StepError::Parse {
                    url: url.clone(),
                    source: ParseError::MissingField("page count"),
                })?;
                next.expected_sub_item_count = Some(count);
                effects.push(Effect::remove(url));
                if count > 0 {
                    next.transition(EntryState::RequestingAllPages, ctx.now)?;
                } else {
                    next.transition(EntryState::RequestingSummaryPage, ctx.now)?;
                }
            }
        }
        EntryState::RequestingAllPages => {
            let count = expected_count(&next)?;
            for index in 1..=count {
                let url = ctx.urls.page_url(&next.remote_id, index);
                effects.push(Effect::enqueue(TransferKind::Page, url, PRIORITY_PAGED_PAGE));
            }
            next.transition(EntryState::WaitingAllPages, ctx.now)?;
        }
        EntryState::WaitingAllPages => {
            if all_ready(ctx, page_urls(&next, ctx)?)?.is_some() {
                next.transition(EntryState::ParsingAllPagesAndRequestingSubItems, ctx.now)?;
            }
        }
        EntryState::ParsingAllPagesAndRequestingSubItems => {
            let urls = page_urls(&next, ctx)?;
            if let Some(items) = all_ready(ctx, urls.clone())? {
                let mut sub_items = Vec::with_capacity(items.len());
                for item in &items {
                    let parsed = parse_page(ctx, item)?;
                    let source_url = parsed.sub_item_url.ok_or_else(|| StepError::Parse {
                        url: item.url.clone(),
                        source: ParseError::MissingField("sub-item url"),
                    })?;
                    sub_items.push(SubItem {
                        source_url,
                        local_file_ref: None,
                        author: parsed.author,
                        label: parsed.label,
                    });
                }
                for sub_item in &sub_items {
                    effects.push(Effect::enqueue(
                        TransferKind::File,
                        sub_item.source_url.clone(),
                        PRIORITY_SUB_ITEM,
                    ));
                }
                effects.extend(urls.into_iter().map(Effect::remove));
                next.sub_items = sub_items;
                next.transition(EntryState::WaitingAllSubItems, ctx.now)?;
            }
        }
        EntryState::WaitingAllSubItems => {
            let expected = expected_count(&next)?;
            if next.sub_items.len() != expected as usize {
                return Err(StepError::SubItemCountMismatch {
                    expected,
                    actual: next.sub_items.len(),
                });
            }
            let sources = next.sub_items.iter().map(|s| s.source_url.clone()).collect();
            if let Some(items) = all_ready(ctx, sources)? {
                for (sub_item, item) in next.sub_items.iter_mut().zip(items) {
                    sub_item.local_file_ref = Some(item.local_file_ref);
                }
                next.content_hash = Some(content_hash(&next, ctx)?);
                next.transition(EntryState::RequestingSummaryPage, ctx.now)?;
            }
        }
        EntryState::RequestingSummaryPage => {
            let url = ctx.urls.summary_url(&next.remote_id);
            effects.push(Effect::enqueue(TransferKind::Page, url, PRIORITY_ENTRY_PAGE));
            next.transition(EntryState::WaitingSummaryPage, ctx.now)?;
        }
        EntryState::WaitingSummaryPage => {
            let url = ctx.urls.summary_url(&next.remote_id);
            if let Poll::Ready(_) = poll(ctx, &url)? {
                next.transition(EntryState::ParsingSummaryPage, ctx.now)?;
            }
        }
        EntryState::ParsingSummaryPage => {
            let url = ctx.urls.summary_url(&next.remote_id);
            if let Poll::Ready(item) = poll(ctx, &url)? {
                let path = ctx.payloads.path_of(&item.local_file_ref);
                let summary = ctx
                    .parser
                    .parse_summary(&path)
                    .map_err(|source| StepError::Parse {
                        url: url.clone(),
                        source,
                    })?;
                next.summary = Some(summary);
                next.content_hash = Some(content_hash(&next, ctx)?);
                effects.push(Effect::remove(url));
                next.transition(EntryState::Done, ctx.now)?;
            }
        }
        EntryState::Done | EntryState::Error => {}
    }

    let to = next.state;
    *entry = next;
    Ok(Step { from, to, effects })
}

/// Every url an entry may own in the queue, for cleanup on removal.
pub fn owned_urls(entry: &CacheEntry, urls: &dyn UrlScheme) -> Vec<String> {
    let mut owned = vec![
        urls.first_page_url(&entry.remote_id),
        urls.summary_url(&entry.remote_id),
    ];
    if let Some(count) = entry.expected_sub_item_count {
        owned.extend((1..=count).map(|index| urls.page_url(&entry.remote_id, index)));
    }
    owned.extend(entry.sub_items.iter().map(|s| s.source_url.clone()));
    owned
}

/// Urls the entry still depends on: those of its current phase plus every
/// sub-item source. Nothing for `Error`.
///
/// Another entry sharing one of these urls must not remove it from the queue.
pub fn live_urls(entry: &CacheEntry, urls: &dyn UrlScheme) -> Vec<String> {
    use EntryState::*;

    let mut live = match entry.state {
        Error => return Vec::new(),
        New | RequestingFirstPage | WaitingFirstPage | ParsingFirstPage => {
            vec![urls.first_page_url(&entry.remote_id)]
        }
        RequestingAllPages | WaitingAllPages | ParsingAllPagesAndRequestingSubItems => entry
            .expected_sub_item_count
            .map(|count| {
                (1..=count)
                    .map(|index| urls.page_url(&entry.remote_id, index))
                    .collect()
            })
            .unwrap_or_default(),
        RequestingSummaryPage | WaitingSummaryPage | ParsingSummaryPage => {
            vec![urls.summary_url(&entry.remote_id)]
        }
        WaitingAllSubItems | Done => Vec::new(),
    };
    live.extend(entry.sub_items.iter().map(|s| s.source_url.clone()));
    live
}

/// Recomputes the digest from the summary (when known) and every sub-item.
pub fn content_hash(entry: &CacheEntry, ctx: &StepContext<'_>) -> Result<String, StepError> {
    let mut hasher = ContentHasher::new();
    if let Some(summary) = &entry.summary {
        hasher.summary(summary);
    }
    for sub_item in &entry.sub_items {
        hasher
            .text(sub_item.author.as_deref())
            .text(sub_item.label.as_deref());
        if let Some(local_ref) = &sub_item.local_file_ref {
            let bytes = ctx
                .payloads
                .read(local_ref)
                .map_err(|source| StepError::Payload {
                    local_ref: local_ref.clone(),
                    source,
                })?;
            hasher.bytes(&bytes);
        }
    }
    Ok(hasher.finish())
}

fn poll(ctx: &StepContext<'_>, url: &str) -> Result<Poll, StepError> {
    match ctx.queue.find(url) {
        None => Err(StepError::MissingQueueItem {
            url: url.to_string(),
        }),
        Some(item) if item.status == TransferStatus::Downloaded => Ok(Poll::Ready(item)),
        Some(_) => Ok(Poll::Pending),
    }
}

/// Returns the items once every url is downloaded. Any missing url is an
/// error even if others are still pending.
fn all_ready(
    ctx: &StepContext<'_>,
    urls: Vec<String>,
) -> Result<Option<Vec<TransferItem>>, StepError> {
    let mut ready = Vec::with_capacity(urls.len());
    let mut pending = false;
    for url in urls {
        match poll(ctx, &url)? {
            Poll::Ready(item) => ready.push(item),
            Poll::Pending => pending = true,
        }
    }
    Ok(if pending { None } else { Some(ready) })
}

fn expected_count(entry: &CacheEntry) -> Result<u32, StepError> {
    entry
        .expected_sub_item_count
        .ok_or(StepError::MissingExpectedCount)
}

fn page_urls(entry: &CacheEntry, ctx: &StepContext<'_>) -> Result<Vec<String>, StepError> {
    let count = expected_count(entry)?;
    Ok((1..=count)
        .map(|index| ctx.urls.page_url(&entry.remote_id, index))
        .collect())
}

fn parse_page(ctx: &StepContext<'_>, item: &TransferItem) -> Result<crate::ParsedPage, StepError> {
    let path = ctx.payloads.path_of(&item.local_file_ref);
    ctx.parser
        .parse_page(&path)
        .map_err(|source| StepError::Parse {
            url: item.url.clone(),
            source,
        })
}
