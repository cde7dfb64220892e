//! Advisory file locks.

use anyhow::{Context, Result};
use fs2::FileExt;
use log::debug;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Exclusive advisory lock on a file, released on drop.
///
/// The lock is advisory: it only excludes other processes that also take it,
/// which every manifest writer in this crate does.
#[derive(Debug)]
pub struct FileLock {
    file: Option<File>,
    path: PathBuf,
}

impl FileLock {
    /// Block until an exclusive lock on `path` is held.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;

        debug!("Waiting for lock on {}", path.display());
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", path.display()))?;
        debug!("Acquired lock on {}", path.display());

        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
        })
    }

    /// A guard that holds nothing. Used by mock runtimes.
    #[cfg(test)]
    pub(crate) fn unlocked(path: &Path) -> Self {
        Self {
            file: None,
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
            debug!("Released lock on {}", self.path.display());
        }
    }
}
