//! Application layer - the install, remove and status flows.
//!
//! Commands parse input and print; everything that touches the manifest,
//! environments or shims happens here.

mod install;
mod remove;
mod status;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::PathBuf;

use crate::commands::paths::AppPaths;
use crate::manifest::{InstalledPackageEntry, ManifestStore};
use crate::runtime::Runtime;
use crate::shim::{ShimConfig, ShimFlavor, ShimWriter};

pub use install::{InstallReport, InstallUseCase, UpdateOutcome};
pub use remove::{RemoveAction, RemoveReport, Removal};
pub use status::{StatusAction, StatusReport};

/// What every flow needs: where things live and how shims look.
pub struct AppContext<'a, R: Runtime> {
    pub runtime: &'a R,
    pub paths: &'a AppPaths,
    pub shim_config: &'a ShimConfig,
    pub flavor: ShimFlavor,
}

impl<R: Runtime> Clone for AppContext<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R: Runtime> Copy for AppContext<'_, R> {}

impl<'a, R: Runtime> AppContext<'a, R> {
    pub fn new(runtime: &'a R, paths: &'a AppPaths, shim_config: &'a ShimConfig) -> Self {
        Self {
            runtime,
            paths,
            shim_config,
            flavor: ShimFlavor::host(),
        }
    }

    pub fn with_flavor(mut self, flavor: ShimFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn store(&self) -> ManifestStore<'a, R> {
        ManifestStore::new(self.runtime, self.paths.manifest_path.clone())
    }

    pub fn shims(&self) -> ShimWriter<'a, R> {
        ShimWriter::new(self.runtime, self.paths.bin_dir.clone(), self.flavor)
    }

    /// Delete the environment of an entry that is no longer recorded.
    /// Linked checkouts and anything outside the environment root are left
    /// alone.
    pub fn remove_env(&self, entry: &InstalledPackageEntry) -> Result<Option<PathBuf>> {
        if entry.is_linked() {
            debug!("Keeping linked checkout {:?}", entry.path);
            return Ok(None);
        }
        if !self.paths.is_managed_env(&entry.path) {
            warn!(
                "Not deleting {:?}: outside {:?}",
                entry.path, self.paths.env_root
            );
            return Ok(None);
        }
        if !self.runtime.exists(&entry.path) {
            return Ok(None);
        }
        self.runtime
            .remove_dir_all(&entry.path)
            .with_context(|| format!("Failed to remove environment {:?}", entry.path))?;
        info!("Removed environment {:?}", entry.path);
        Ok(Some(entry.path.clone()))
    }
}
