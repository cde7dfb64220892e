use anyhow::{Context, Result};
use log::{debug, warn};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::{AppManifest, MANIFEST_FORMAT_VERSION};
use crate::error::AppError;
use crate::runtime::Runtime;

/// Persistence for the app manifest.
///
/// Writes go to `<manifest>.tmp` and are renamed over the live file, so a
/// reader sees either the old or the new manifest. Read-modify-write cycles
/// run under an exclusive lock on `<manifest>.lock`.
pub struct ManifestStore<'a, R: Runtime> {
    runtime: &'a R,
    path: PathBuf,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

impl<'a, R: Runtime> ManifestStore<'a, R> {
    pub fn new(runtime: &'a R, path: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tmp_path(&self) -> PathBuf {
        with_suffix(&self.path, ".tmp")
    }

    pub fn lock_path(&self) -> PathBuf {
        with_suffix(&self.path, ".lock")
    }

    /// Load the manifest. A missing file is an empty manifest; a file that
    /// does not parse is [`AppError::ManifestCorrupt`].
    #[tracing::instrument(skip(self))]
    pub fn read(&self) -> Result<AppManifest> {
        if !self.runtime.exists(&self.path) {
            debug!("No manifest at {:?}, starting empty", self.path);
            return Ok(AppManifest::new());
        }

        let content = self.runtime.read_to_string(&self.path)?;
        let manifest: AppManifest =
            serde_json::from_str(&content).map_err(|e| AppError::ManifestCorrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        if manifest.version > MANIFEST_FORMAT_VERSION {
            return Err(AppError::ManifestCorrupt {
                path: self.path.clone(),
                reason: format!(
                    "format version {} is newer than supported version {}",
                    manifest.version, MANIFEST_FORMAT_VERSION
                ),
            }
            .into());
        }

        Ok(manifest)
    }

    /// Replace the manifest on disk.
    #[tracing::instrument(skip(self, manifest))]
    pub fn write(&self, manifest: &AppManifest) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            self.runtime.create_dir_all(parent)?;
        }

        let mut json =
            serde_json::to_string_pretty(manifest).context("Failed to serialize app manifest")?;
        json.push('\n');

        let tmp = self.tmp_path();
        self.runtime.write(&tmp, json.as_bytes())?;

        if let Err(e) = self.runtime.rename(&tmp, &self.path) {
            if let Err(remove_err) = self.runtime.remove_file(&tmp) {
                warn!("Failed to remove {:?}: {}", tmp, remove_err);
            }
            return Err(e.context(format!("Failed to replace {}", self.path.display())));
        }

        debug!(
            "Wrote manifest with {} package(s) to {:?}",
            manifest.len(),
            self.path
        );
        Ok(())
    }

    /// Locked read-modify-write. Nothing is written when `f` fails.
    #[tracing::instrument(skip(self, f))]
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut AppManifest) -> Result<T>,
    {
        let _lock = self.runtime.lock_exclusive(&self.lock_path())?;

        let mut manifest = self.read()?;
        let result = f(&mut manifest)?;
        self.write(&manifest)?;
        Ok(result)
    }
}
