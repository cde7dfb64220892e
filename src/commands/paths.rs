use anyhow::{Context, Result};
use log::debug;
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

const MANIFEST_FILE: &str = "manifest.json";
const STAGING_DIR: &str = ".staging";

/// On-disk layout of a depot.
///
/// ```text
/// <depot>/apps/manifest.json
/// <depot>/apps/envs/<name>-<uuid>/
/// <depot>/apps/envs/.staging/
/// <depot>/bin/<app>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub depot: PathBuf,
    pub env_root: PathBuf,
    pub manifest_path: PathBuf,
    pub bin_dir: PathBuf,
}

impl AppPaths {
    pub fn new(depot: impl Into<PathBuf>) -> Self {
        let depot = depot.into();
        let apps = depot.join("apps");
        Self {
            env_root: apps.join("envs"),
            manifest_path: apps.join(MANIFEST_FILE),
            bin_dir: depot.join("bin"),
            depot,
        }
    }

    pub fn with_bin_dir(mut self, bin_dir: impl Into<PathBuf>) -> Self {
        self.bin_dir = bin_dir.into();
        self
    }

    /// Resolve the layout from explicit overrides, falling back to the
    /// default depot.
    #[tracing::instrument(skip(runtime))]
    pub fn resolve<R: Runtime>(
        runtime: &R,
        depot: Option<PathBuf>,
        bin_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let depot = match depot {
            Some(path) => path,
            None => default_depot(runtime)?,
        };
        let mut paths = Self::new(depot);
        if let Some(bin_dir) = bin_dir {
            paths = paths.with_bin_dir(bin_dir);
        }
        debug!("Using paths {:?}", paths);
        Ok(paths)
    }

    /// Where in-flight materializations are staged. Lives under `env_root` so
    /// the final rename stays on one filesystem.
    pub fn staging_dir(&self) -> PathBuf {
        self.env_root.join(STAGING_DIR)
    }

    pub fn env_dir(&self, dir_name: &str) -> PathBuf {
        self.env_root.join(dir_name)
    }

    pub fn is_managed_env(&self, path: &Path) -> bool {
        crate::runtime::path::is_strictly_under(path, &self.env_root)
    }
}

/// Default depot: `~/.pkgapp`, or a system location when privileged.
#[tracing::instrument(skip(runtime))]
pub fn default_depot<R: Runtime>(runtime: &R) -> Result<PathBuf> {
    if runtime.is_privileged() {
        Ok(system_depot())
    } else {
        let home_dir = runtime
            .home_dir()
            .context("Could not find home directory")?;
        Ok(home_dir.join(".pkgapp"))
    }
}

#[cfg(target_os = "macos")]
fn system_depot() -> PathBuf {
    PathBuf::from("/opt/pkgapp")
}

#[cfg(target_os = "windows")]
fn system_depot() -> PathBuf {
    PathBuf::from(r"C:\ProgramData\pkgapp")
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn system_depot() -> PathBuf {
    PathBuf::from("/usr/local/pkgapp")
}
