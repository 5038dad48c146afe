use crate::{Priority, TransferKind};

/// Queue mutation requested by a pipeline step. Steps never touch the queue
/// directly; the engine applies these in order once the step has returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Enqueue {
        kind: TransferKind,
        url: String,
        priority: Priority,
    },
    Remove {
        url: String,
    },
}

impl Effect {
    pub fn enqueue(kind: TransferKind, url: impl Into<String>, priority: Priority) -> Self {
        Effect::Enqueue {
            kind,
            url: url.into(),
            priority,
        }
    }

    pub fn remove(url: impl Into<String>) -> Self {
        Effect::Remove { url: url.into() }
    }
}
