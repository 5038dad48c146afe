use std::fs;
use std::path::PathBuf;

use photocache_core::{Registry, TrackedKey};
use photocache_logging::cache_warn;

/// Registry backed by a RON file of `(key, remote_id)` pairs, re-read on
/// every tick so edits take effect without a restart.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Registry for FileRegistry {
    fn tracked_keys(&self) -> Vec<TrackedKey> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                cache_warn!("Cannot read registry {:?}: {}", self.path, err);
                return Vec::new();
            }
        };
        match ron::from_str::<Vec<(String, String)>>(&text) {
            Ok(pairs) => pairs
                .into_iter()
                .map(|(key, remote_id)| TrackedKey::new(key, remote_id))
                .collect(),
            Err(err) => {
                cache_warn!("Cannot parse registry {:?}: {}", self.path, err);
                Vec::new()
            }
        }
    }
}
