//! Install use case - `add`, `develop` and `update`.
//!
//! Each attempt runs through the [`InstallStage`]s in order. A failure is
//! reported with the stage it happened in; completed stages are not rolled
//! back.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use semver::Version;

use super::AppContext;
use crate::cleanup::{self, SharedCleanupContext};
use crate::error::InstallStage;
use crate::http::HttpClient;
use crate::manifest::{InstalledPackageEntry, PackageSource, UpsertOutcome};
use crate::materialize::{MaterializeRequest, Materializer};
use crate::package::{PackageIdentity, PackageSpec, VersionConstraint};
use crate::registry::Resolver;
use crate::runtime::Runtime;
use crate::shim::ShimTemplate;

#[derive(Debug, Clone, PartialEq)]
pub struct InstallReport {
    pub entry: InstalledPackageEntry,
    pub shims: Vec<PathBuf>,
    pub previous: Option<InstalledPackageEntry>,
    /// Apps other packages had under the same names.
    pub displaced: Vec<(PackageIdentity, String)>,
    /// Environments deleted because nothing records them any more.
    pub removed_envs: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Updated {
        name: String,
        from: Version,
        to: Version,
    },
    UpToDate {
        name: String,
        version: Version,
    },
    /// Not installed from a registry.
    Skipped { name: String },
    Failed { name: String, error: String },
}

/// Attach `stage` unless an inner step already named a more specific one.
fn at_stage<T>(result: Result<T>, stage: InstallStage) -> Result<T> {
    result.map_err(|e| {
        if e.downcast_ref::<InstallStage>().is_some() {
            e
        } else {
            e.context(stage)
        }
    })
}

pub struct InstallUseCase<'a, R: Runtime> {
    ctx: AppContext<'a, R>,
    resolver: &'a Resolver,
    http_client: &'a HttpClient,
    cleanup_ctx: SharedCleanupContext,
}

impl<'a, R: Runtime> InstallUseCase<'a, R> {
    pub fn new(ctx: AppContext<'a, R>, resolver: &'a Resolver, http_client: &'a HttpClient) -> Self {
        Self {
            ctx,
            resolver,
            http_client,
            cleanup_ctx: cleanup::new_shared(),
        }
    }

    /// Install `spec` and expose its apps.
    #[tracing::instrument(skip(self))]
    pub async fn add(&self, spec: &PackageSpec) -> Result<InstallReport> {
        let request = match spec {
            PackageSpec::Registry { name, constraint } => {
                let resolved = at_stage(
                    self.resolver.resolve(name, constraint).await,
                    InstallStage::Resolving,
                )?;
                MaterializeRequest::Registry(resolved)
            }
            PackageSpec::Archive { url } => MaterializeRequest::Archive { url: url.clone() },
            PackageSpec::Git { url, rev } => MaterializeRequest::Git {
                url: url.clone(),
                rev: rev.clone(),
            },
        };
        self.install(&request).await
    }

    /// Expose the apps of a local checkout without copying it.
    #[tracing::instrument(skip(self))]
    pub async fn develop(&self, path: &Path) -> Result<InstallReport> {
        self.install(&MaterializeRequest::Link {
            path: path.to_path_buf(),
        })
        .await
    }

    async fn install(&self, request: &MaterializeRequest) -> Result<InstallReport> {
        let materializer = Materializer::new(
            self.ctx.runtime,
            self.ctx.paths,
            self.http_client,
            self.cleanup_ctx.clone(),
        );

        let interrupt = cleanup::spawn_interrupt_handler(self.cleanup_ctx.clone());
        let materialized = materializer.materialize(request).await;
        interrupt.abort();
        let materialized = at_stage(materialized, InstallStage::Materializing)?;

        let entry = InstalledPackageEntry {
            identity: materialized.project.identity.clone(),
            source: materialized.source,
            path: materialized.path,
            apps: materialized.project.apps,
        };

        let outcome = at_stage(
            self.ctx.store().update(|manifest| Ok(manifest.upsert(entry.clone()))),
            InstallStage::UpdatingManifest,
        )?;
        for (owner, app) in &outcome.displaced {
            warn!("App `{}` of {} now belongs to {}", app, owner, entry.identity);
        }
        let removed_envs = self.remove_unrecorded_envs(&entry, &outcome);

        let shims = at_stage(self.write_shims(&entry), InstallStage::GeneratingShims)?;

        if let Some(previous) = &outcome.previous {
            let shims = self.ctx.shims();
            for app in previous.apps.keys().filter(|a| !entry.apps.contains_key(*a)) {
                if let Err(e) = shims.remove(app) {
                    warn!("Failed to remove stale shim for `{}`: {}", app, e);
                }
            }
        }

        info!(
            "Installed {} {} with {} app(s)",
            entry.identity,
            entry.version_or_revision(),
            entry.apps.len()
        );
        Ok(InstallReport {
            entry,
            shims,
            previous: outcome.previous,
            displaced: outcome.displaced,
            removed_envs,
        })
    }

    /// Environments the manifest stopped referencing: packages that lost
    /// their last app to `entry`, and a copy-mode predecessor of `entry`
    /// living at another path. Failures are logged.
    fn remove_unrecorded_envs(
        &self,
        entry: &InstalledPackageEntry,
        outcome: &UpsertOutcome,
    ) -> Vec<PathBuf> {
        let superseded = outcome
            .previous
            .iter()
            .filter(|previous| previous.path != entry.path);

        let mut removed = Vec::new();
        for stale in outcome.dropped.iter().chain(superseded) {
            match self.ctx.remove_env(stale) {
                Ok(Some(path)) => removed.push(path),
                Ok(None) => {}
                Err(e) => warn!("Failed to remove environment of {}: {:#}", stale.identity, e),
            }
        }
        removed
    }

    fn write_shims(&self, entry: &InstalledPackageEntry) -> Result<Vec<PathBuf>> {
        let shims = self.ctx.shims();
        entry
            .apps
            .values()
            .map(|app| {
                let template = ShimTemplate::for_app(
                    self.ctx.shim_config,
                    &entry.path,
                    &entry.identity.name,
                    app,
                );
                shims.write(&app.name, &template)
            })
            .collect()
    }

    /// Move every registry-installed package to its newest eligible version.
    /// One package failing does not stop the others.
    #[tracing::instrument(skip(self))]
    pub async fn update_all(&self) -> Result<Vec<UpdateOutcome>> {
        let manifest = self.ctx.store().read()?;
        let mut outcomes = Vec::new();

        for entry in manifest.entries() {
            let name = entry.identity.name.clone();
            let PackageSource::Registry { version, .. } = &entry.source else {
                info!("Skipping {}: not installed from a registry", name);
                outcomes.push(UpdateOutcome::Skipped { name });
                continue;
            };

            let outcome = match self.update_one(entry, version).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Failed to update {}: {:#}", name, e);
                    UpdateOutcome::Failed {
                        name,
                        error: format!("{:#}", e),
                    }
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn update_one(
        &self,
        entry: &InstalledPackageEntry,
        installed: &Version,
    ) -> Result<UpdateOutcome> {
        let name = entry.identity.name.clone();
        let resolved = at_stage(
            self.resolver
                .resolve(&name, &VersionConstraint::Latest)
                .await,
            InstallStage::Resolving,
        )?;

        if resolved.identity.uuid != entry.identity.uuid {
            anyhow::bail!(
                "registry now publishes `{}` as {}, installed is {}",
                name,
                resolved.identity,
                entry.identity
            );
        }
        if resolved.version <= *installed {
            return Ok(UpdateOutcome::UpToDate {
                name,
                version: installed.clone(),
            });
        }

        let to = resolved.version.clone();
        self.install(&MaterializeRequest::Registry(resolved))
            .await
            .with_context(|| format!("Failed to install {} {}", name, to))?;
        Ok(UpdateOutcome::Updated {
            name,
            from: installed.clone(),
            to,
        })
    }
}
