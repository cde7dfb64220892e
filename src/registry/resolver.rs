//! Resolution of a package name and constraint against several registries.

use anyhow::{Context, Result, bail};
use log::{debug, info};
use std::sync::Arc;

use super::{Registry, ResolvedVersion};
use crate::error::AppError;
use crate::package::{PackageIdentity, VersionConstraint, VersionEntry, VersionResolver};

/// Ordered set of registries. Order breaks ties between equal versions.
#[derive(Default)]
pub struct Resolver {
    registries: Vec<Arc<dyn Registry>>,
}

struct Candidate<'a> {
    registry: &'a Arc<dyn Registry>,
    identity: PackageIdentity,
    entry: VersionEntry,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, registry: Arc<dyn Registry>) {
        self.registries.push(registry);
    }

    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }

    /// Pick the highest non-yanked version satisfying `constraint` across all
    /// registries.
    ///
    /// Fails with [`AppError::PackageNotFound`] when nothing is eligible and
    /// with [`AppError::AmbiguousPackage`] when two registries publish the
    /// name under different uuids.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(
        &self,
        name: &str,
        constraint: &VersionConstraint,
    ) -> Result<ResolvedVersion> {
        if self.is_empty() {
            bail!("No registries configured; pass --registry or set PKGAPP_REGISTRY");
        }

        let mut best: Option<Candidate> = None;
        let mut known: Option<(PackageIdentity, &str)> = None;

        for registry in &self.registries {
            let Some(package) = registry
                .lookup(name)
                .await
                .with_context(|| format!("Failed to query registry {}", registry.name()))?
            else {
                debug!("Registry {} does not know {}", registry.name(), name);
                continue;
            };

            let identity = package.identity();
            match &known {
                Some((first, first_registry)) if first.uuid != identity.uuid => {
                    return Err(AppError::AmbiguousPackage {
                        name: name.to_string(),
                        first: first.uuid,
                        first_registry: first_registry.to_string(),
                        second: identity.uuid,
                        second_registry: registry.name().to_string(),
                    }
                    .into());
                }
                Some(_) => {}
                None => known = Some((identity.clone(), registry.name())),
            }

            let Some(entry) = VersionResolver::select(&package.versions, constraint) else {
                debug!(
                    "Registry {} has no eligible version of {} for {}",
                    registry.name(),
                    name,
                    constraint
                );
                continue;
            };

            if best
                .as_ref()
                .is_none_or(|b| entry.version > b.entry.version)
            {
                best = Some(Candidate {
                    registry,
                    identity,
                    entry: entry.clone(),
                });
            }
        }

        let Some(best) = best else {
            return Err(AppError::PackageNotFound {
                name: name.to_string(),
                constraint: constraint.to_string(),
            }
            .into());
        };

        info!(
            "Resolved {} {} to {} from {}",
            name,
            constraint,
            best.entry.version,
            best.registry.name()
        );

        Ok(ResolvedVersion {
            source_url: best
                .registry
                .source_url(&best.identity, &best.entry.content_hash),
            registry: best.registry.name().to_string(),
            identity: best.identity,
            version: best.entry.version,
            content_hash: best.entry.content_hash,
        })
    }
}
