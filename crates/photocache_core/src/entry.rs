use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Acquisition pipeline position of one tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntryState {
    New,
    RequestingFirstPage,
    WaitingFirstPage,
    ParsingFirstPage,
    RequestingAllPages,
    WaitingAllPages,
    ParsingAllPagesAndRequestingSubItems,
    WaitingAllSubItems,
    RequestingSummaryPage,
    WaitingSummaryPage,
    ParsingSummaryPage,
    Done,
    Error,
}

impl EntryState {
    pub const ALL: [EntryState; 13] = [
        EntryState::New,
        EntryState::RequestingFirstPage,
        EntryState::WaitingFirstPage,
        EntryState::ParsingFirstPage,
        EntryState::RequestingAllPages,
        EntryState::WaitingAllPages,
        EntryState::ParsingAllPagesAndRequestingSubItems,
        EntryState::WaitingAllSubItems,
        EntryState::RequestingSummaryPage,
        EntryState::WaitingSummaryPage,
        EntryState::ParsingSummaryPage,
        EntryState::Done,
        EntryState::Error,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            Self::WaitingFirstPage
                | Self::WaitingAllPages
                | Self::WaitingAllSubItems
                | Self::WaitingSummaryPage
        )
    }

    /// Forward edges of the pipeline. `Error` is reachable from every
    /// non-terminal state and is not listed here.
    pub fn successors(self) -> &'static [EntryState] {
        use EntryState::*;
        match self {
            New => &[RequestingFirstPage, WaitingFirstPage],
            RequestingFirstPage => &[WaitingFirstPage],
            WaitingFirstPage => &[ParsingFirstPage],
            ParsingFirstPage => &[RequestingAllPages, RequestingSummaryPage],
            RequestingAllPages => &[WaitingAllPages],
            WaitingAllPages => &[ParsingAllPagesAndRequestingSubItems],
            ParsingAllPagesAndRequestingSubItems => &[WaitingAllSubItems],
            WaitingAllSubItems => &[RequestingSummaryPage],
            RequestingSummaryPage => &[WaitingSummaryPage],
            WaitingSummaryPage => &[ParsingSummaryPage],
            ParsingSummaryPage => &[Done],
            Done | Error => &[],
        }
    }

    pub fn can_advance_to(self, next: EntryState) -> bool {
        if next == EntryState::Error {
            return !self.is_terminal();
        }
        self.successors().contains(&next)
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One resource (typically an image) discovered on a paged page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubItem {
    pub source_url: String,
    pub local_file_ref: Option<String>,
    pub author: Option<String>,
    pub label: Option<String>,
}

/// The three textual fields extracted from an entity's summary page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SummaryFields {
    pub title: String,
    pub subtitle: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal transition {from} -> {to}")]
    Illegal { from: EntryState, to: EntryState },
    #[error("cannot enter {to}: {missing}")]
    Precondition { to: EntryState, missing: &'static str },
}

/// Acquisition state plus collected results for one tracked entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub remote_id: String,
    pub state: EntryState,
    pub expected_sub_item_count: Option<u32>,
    #[serde(default)]
    pub sub_items: Vec<SubItem>,
    #[serde(default)]
    pub summary: Option<SummaryFields>,
    pub content_hash: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(remote_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            remote_id: remote_id.into(),
            state: EntryState::New,
            expected_sub_item_count: None,
            sub_items: Vec::new(),
            summary: None,
            content_hash: None,
            last_error: None,
            created_at: now,
            status_changed_at: now,
        }
    }

    /// Moves to `to` if the edge exists and the data it depends on has been
    /// populated.
    pub fn transition(&mut self, to: EntryState, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.state.can_advance_to(to) {
            return Err(TransitionError::Illegal {
                from: self.state,
                to,
            });
        }
        self.check_preconditions(to)?;
        self.state = to;
        self.status_changed_at = now;
        Ok(())
    }

    /// Parks the entry in `Error`. Terminal entries are left untouched.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = EntryState::Error;
        self.last_error = Some(reason.into());
        self.status_changed_at = now;
        true
    }

    /// Sub-items are only exposed once the whole pipeline has completed.
    pub fn completed_sub_items(&self) -> &[SubItem] {
        if self.state == EntryState::Done {
            &self.sub_items
        } else {
            &[]
        }
    }

    fn check_preconditions(&self, to: EntryState) -> Result<(), TransitionError> {
        let missing = match to {
            EntryState::RequestingAllPages => match self.expected_sub_item_count {
                Some(n) if n > 0 => None,
                _ => Some("expected sub-item count must be positive"),
            },
            EntryState::WaitingAllSubItems if self.sub_items.is_empty() => {
                Some("sub-items must be collected")
            }
            EntryState::RequestingSummaryPage => match self.expected_sub_item_count {
                None => Some("expected sub-item count is unset"),
                Some(0) => None,
                Some(n) if self.sub_items.len() != n as usize => {
                    Some("sub-item list does not match expected count")
                }
                Some(_) if self.sub_items.iter().any(|s| s.local_file_ref.is_none()) => {
                    Some("every sub-item needs a local file")
                }
                Some(_) => None,
            },
            EntryState::Done if self.summary.is_none() => Some("summary fields are missing"),
            _ => None,
        };
        match missing {
            Some(missing) => Err(TransitionError::Precondition { to, missing }),
            None => Ok(()),
        }
    }
}
