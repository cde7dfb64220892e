//! `status` - read-only view of installed packages and their shims.

use anyhow::Result;
use std::collections::BTreeSet;

use super::AppContext;
use crate::manifest::InstalledPackageEntry;
use crate::runtime::Runtime;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusReport {
    pub packages: Vec<InstalledPackageEntry>,
    /// Shims in the bin directory no recorded app accounts for.
    pub orphaned_shims: Vec<String>,
    /// Recorded apps whose shim is gone.
    pub missing_shims: Vec<String>,
}

pub struct StatusAction<'a, R: Runtime> {
    ctx: AppContext<'a, R>,
}

impl<'a, R: Runtime> StatusAction<'a, R> {
    pub fn new(ctx: AppContext<'a, R>) -> Self {
        Self { ctx }
    }

    #[tracing::instrument(skip(self))]
    pub fn status(&self) -> Result<StatusReport> {
        let manifest = self.ctx.store().read()?;
        let packages: Vec<_> = manifest.entries().cloned().collect();

        let recorded: BTreeSet<&str> = packages
            .iter()
            .flat_map(|e| e.apps.keys().map(String::as_str))
            .collect();
        let present: BTreeSet<String> = self.ctx.shims().list()?.into_iter().collect();

        let orphaned_shims = present
            .iter()
            .filter(|app| !recorded.contains(app.as_str()))
            .cloned()
            .collect();
        let missing_shims = recorded
            .iter()
            .filter(|app| !present.contains(**app))
            .map(|app| app.to_string())
            .collect();

        Ok(StatusReport {
            packages,
            orphaned_shims,
            missing_shims,
        })
    }
}
