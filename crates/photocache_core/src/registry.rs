use serde::{Deserialize, Serialize};

/// An entity that should be cached: the local key plus the identifier the
/// remote site knows it by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedKey {
    pub key: String,
    pub remote_id: String,
}

impl TrackedKey {
    pub fn new(key: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            remote_id: remote_id.into(),
        }
    }
}

/// Enumerates the entities that need a cache entry. Consulted once per tick.
pub trait Registry: Send + Sync {
    fn tracked_keys(&self) -> Vec<TrackedKey>;
}

/// Fixed in-memory registry.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    keys: Vec<TrackedKey>,
}

impl StaticRegistry {
    pub fn new(keys: Vec<TrackedKey>) -> Self {
        Self { keys }
    }
}

impl Registry for StaticRegistry {
    fn tracked_keys(&self) -> Vec<TrackedKey> {
        self.keys.clone()
    }
}
