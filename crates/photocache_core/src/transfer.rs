use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Drain ordering hint; higher values are transferred first.
pub type Priority = i32;

pub const PRIORITY_ENTRY_PAGE: Priority = 60;
pub const PRIORITY_PAGED_PAGE: Priority = 50;
pub const PRIORITY_SUB_ITEM: Priority = 30;
pub const PRIORITY_UPLOAD: Priority = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Upload,
    Download,
}

/// How the payload of a transfer is stored: decoded text for pages, raw
/// bytes for files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferKind {
    Page,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    Required,
    Requested,
    Downloaded,
    Uploaded,
    Failed,
}

impl TransferStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Downloaded | Self::Uploaded)
    }
}

/// One requested network operation. The `url` is the natural key: the queue
/// holds at most one item per url.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferItem {
    pub direction: Direction,
    pub kind: TransferKind,
    pub url: String,
    pub status: TransferStatus,
    pub priority: Priority,
    /// `<folder>/<file name>`, relative to the queue root.
    pub local_file_ref: String,
    pub created_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
}

impl TransferItem {
    pub fn new(
        direction: Direction,
        kind: TransferKind,
        url: impl Into<String>,
        local_file_ref: impl Into<String>,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            direction,
            kind,
            url: url.into(),
            status: TransferStatus::Required,
            priority,
            local_file_ref: local_file_ref.into(),
            created_at: now,
            status_changed_at: now,
        }
    }

    /// Sets the status, touching `status_changed_at` only when the value
    /// actually changes. Returns whether it changed.
    pub fn set_status(&mut self, status: TransferStatus, now: DateTime<Utc>) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.status_changed_at = now;
        true
    }
}
