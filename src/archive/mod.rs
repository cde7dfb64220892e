//! Source archive extraction.
//!
//! Format extractors only unpack entries as stored. [`ArchiveExtractorImpl`]
//! picks the extractor by file name, unpacks into a sibling temp directory and
//! moves the contents into place, unwrapping a single top-level directory the
//! way source tarballs are usually laid out.

mod tar_gz;
mod zip;

use crate::cleanup::{CleanupGuard, SharedCleanupContext};
use crate::runtime::Runtime;
use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info};
use std::path::{Component, Path, PathBuf};

pub use tar_gz::TarGzExtractor;
pub use zip::ZipExtractor;

/// Trait for format-specific archive extractors
pub trait ArchiveExtractor: Send + Sync {
    /// Check if this extractor can handle the given archive format
    fn can_handle(&self, archive_path: &Path) -> bool;

    /// Write every entry of the archive under `dest`, exactly as stored.
    fn unpack<R: Runtime>(&self, runtime: &R, archive_path: &Path, dest: &Path) -> Result<()>;
}

/// Relative path of an archive entry, or `None` when it would escape the
/// destination (absolute paths, `..`, drive prefixes).
pub(crate) fn sanitize_entry_path(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

/// Dispatcher that selects the appropriate extractor based on archive format.
pub struct ArchiveExtractorImpl {
    tar_gz: TarGzExtractor,
    zip: ZipExtractor,
}

impl Default for ArchiveExtractorImpl {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveExtractorImpl {
    pub fn new() -> Self {
        Self {
            tar_gz: TarGzExtractor,
            zip: ZipExtractor,
        }
    }

    pub fn can_handle(&self, archive_path: &Path) -> bool {
        self.tar_gz.can_handle(archive_path) || self.zip.can_handle(archive_path)
    }

    fn unpack<R: Runtime>(&self, runtime: &R, archive_path: &Path, dest: &Path) -> Result<()> {
        if self.tar_gz.can_handle(archive_path) {
            return self.tar_gz.unpack(runtime, archive_path, dest);
        }
        if self.zip.can_handle(archive_path) {
            return self.zip.unpack(runtime, archive_path, dest);
        }
        Err(anyhow!(
            "Unsupported archive format: {}",
            archive_path.display()
        ))
    }

    /// Extract `archive_path` into `extract_to`, registering the temp
    /// directory for removal on interruption.
    #[tracing::instrument(skip(self, runtime, cleanup_ctx))]
    pub fn extract_with_cleanup<R: Runtime>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
        cleanup_ctx: SharedCleanupContext,
    ) -> Result<()> {
        self.extract_impl(runtime, archive_path, extract_to, Some(cleanup_ctx))
    }

    fn extract_impl<R: Runtime>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
        cleanup_ctx: Option<SharedCleanupContext>,
    ) -> Result<()> {
        if !self.can_handle(archive_path) {
            bail!("Unsupported archive format: {}", archive_path.display());
        }
        let Some(dir_name) = extract_to.file_name() else {
            bail!("Invalid extraction target {:?}", extract_to);
        };

        let temp_extract_dir =
            extract_to.with_file_name(format!("{}.unpack", dir_name.to_string_lossy()));
        if runtime.exists(&temp_extract_dir) {
            runtime.remove_dir_all(&temp_extract_dir)?;
        }
        runtime.create_dir_all(&temp_extract_dir)?;
        let guard = cleanup_ctx.map(|ctx| CleanupGuard::new(ctx, temp_extract_dir.clone()));

        debug!("Unpacking {:?} to {:?}", archive_path, temp_extract_dir);
        self.unpack(runtime, archive_path, &temp_extract_dir)
            .with_context(|| format!("Failed to unpack {}", archive_path.display()))?;

        let entries = runtime
            .read_dir(&temp_extract_dir)
            .context("Failed to read temp extraction directory")?;
        let source_dir = match entries.as_slice() {
            [] => bail!("Archive {} appears to be empty.", archive_path.display()),
            [single] if runtime.is_dir(single) => single.clone(),
            _ => temp_extract_dir.clone(),
        };

        runtime.create_dir_all(extract_to)?;
        debug!("Moving contents from {:?} to {:?}", source_dir, extract_to);
        for item in runtime.read_dir(&source_dir)? {
            let Some(name) = item.file_name() else {
                continue;
            };
            runtime.rename(&item, &extract_to.join(name))?;
        }

        runtime.remove_dir_all(&temp_extract_dir)?;
        if let Some(guard) = guard {
            guard.success();
        }

        info!("Extracted {}", archive_path.display());
        Ok(())
    }
}
