//! `rm` - remove a package or a single app.

use anyhow::{Context, Result};
use log::{debug, info};
use std::path::PathBuf;

use super::AppContext;
use crate::error::AppError;
use crate::manifest::{AppManifest, InstalledPackageEntry};
use crate::package::PackageIdentity;
use crate::runtime::Runtime;

/// What `rm` matched.
#[derive(Debug, Clone, PartialEq)]
pub enum Removal {
    Package(InstalledPackageEntry),
    /// One app; `package` is set when it was the last app and took the entry
    /// with it.
    App {
        identity: PackageIdentity,
        app: String,
        package: Option<InstalledPackageEntry>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoveReport {
    pub removal: Removal,
    pub removed_shims: Vec<String>,
    /// Environment directory deleted from disk, if any.
    pub removed_env: Option<PathBuf>,
}

pub struct RemoveAction<'a, R: Runtime> {
    ctx: AppContext<'a, R>,
}

impl<'a, R: Runtime> RemoveAction<'a, R> {
    pub fn new(ctx: AppContext<'a, R>) -> Self {
        Self { ctx }
    }

    /// Remove by package name, falling back to app name.
    #[tracing::instrument(skip(self))]
    pub fn remove(&self, name: &str) -> Result<RemoveReport> {
        let removal = self.ctx.store().update(|manifest| Self::take(manifest, name))?;

        let (shims, dropped) = match &removal {
            Removal::Package(entry) => (entry.apps.keys().cloned().collect(), Some(entry)),
            Removal::App { app, package, .. } => (vec![app.clone()], package.as_ref()),
        };

        let writer = self.ctx.shims();
        let mut removed_shims = Vec::new();
        for app in shims {
            if writer
                .remove(&app)
                .with_context(|| format!("Failed to remove shim for `{}`", app))?
            {
                removed_shims.push(app);
            } else {
                debug!("No shim for `{}` to remove", app);
            }
        }

        let removed_env = match dropped {
            Some(entry) => self.ctx.remove_env(entry)?,
            None => None,
        };

        Ok(RemoveReport {
            removal,
            removed_shims,
            removed_env,
        })
    }

    fn take(manifest: &mut AppManifest, name: &str) -> Result<Removal> {
        if let Some(uuid) = manifest.find_by_name(name).map(|e| e.identity.uuid) {
            let entry = manifest
                .remove_package(&uuid)
                .ok_or_else(|| AppError::NotInstalled(name.to_string()))?;
            info!("Removing package {}", entry.identity);
            return Ok(Removal::Package(entry));
        }

        let identity = manifest
            .find_by_app(name)
            .map(|e| e.identity.clone())
            .ok_or_else(|| AppError::NotInstalled(name.to_string()))?;
        let removed = manifest
            .remove_app(&identity.uuid, name)
            .ok_or_else(|| AppError::NotInstalled(name.to_string()))?;
        info!("Removing app `{}` of {}", name, identity);
        Ok(Removal::App {
            identity,
            app: name.to_string(),
            package: removed.package,
        })
    }
}
