use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use photocache_logging::cache_warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("directory missing or not writable: {path:?}: {message}")]
    Directory { path: PathBuf, message: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Ensure a directory exists; create it (and its parents) if missing.
pub fn ensure_dir(dir: &Path) -> Result<(), PersistError> {
    let directory_error = |err: io::Error| PersistError::Directory {
        path: dir.to_path_buf(),
        message: err.to_string(),
    };
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(directory_error)?;
        if !meta.is_dir() {
            return Err(PersistError::Directory {
                path: dir.to_path_buf(),
                message: "path is not a directory".into(),
            });
        }
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(directory_error)
}

/// Writes whole files under a root directory via temp-file-then-rename, so a
/// reader never observes a half-written file.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    root: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `content` to `root/relative`, creating intermediate folders.
    pub fn write(&self, relative: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        let target = self.root.join(relative);
        let dir = target.parent().unwrap_or(&self.root).to_path_buf();
        ensure_dir(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content)?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }
}

/// Loads a JSON snapshot.
///
/// A missing file is empty state. A zero-byte or unparsable file is deleted
/// with a warning and also treated as empty state.
pub fn load_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    if content.is_empty() {
        cache_warn!("Snapshot {:?} is empty; discarding it", path);
        discard(path);
        return Ok(None);
    }

    match serde_json::from_slice(&content) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            cache_warn!("Snapshot {:?} is corrupt ({}); discarding it", path, err);
            discard(path);
            Ok(None)
        }
    }
}

/// Serializes `value` as pretty JSON and writes it atomically to `path`.
pub fn save_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let content = serde_json::to_vec_pretty(value)?;
    let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PersistError::Directory {
            path: path.to_path_buf(),
            message: "snapshot path has no file name".into(),
        })?;
    AtomicFileWriter::new(dir).write(&name, &content)?;
    Ok(())
}

fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        cache_warn!("Failed to delete snapshot {:?}: {}", path, err);
    }
}
