//! Package registries and version resolution.
//!
//! A registry answers one question: which versions of a package does it
//! publish, and where does the source archive for a given content hash live.
//! The [`Resolver`] asks every configured registry and picks the best match.

mod http;
mod resolver;

use anyhow::Result;
use async_trait::async_trait;
use semver::Version;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::package::{PackageIdentity, VersionEntry};

pub use self::http::HttpRegistry;
pub use resolver::Resolver;

/// Everything a registry knows about one package name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageVersions {
    pub name: String,
    pub uuid: Uuid,
    pub versions: Vec<VersionEntry>,
}

impl PackageVersions {
    pub fn identity(&self) -> PackageIdentity {
        PackageIdentity::new(self.name.clone(), self.uuid)
    }
}

/// A concrete, installable version.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVersion {
    pub identity: PackageIdentity,
    pub version: Version,
    pub content_hash: String,
    pub source_url: String,
    /// Name of the registry the version was taken from.
    pub registry: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Registry: Send + Sync {
    /// Registry name, used in messages and recorded in the manifest.
    fn name(&self) -> &str;

    /// Look up a package by name. `Ok(None)` means this registry does not
    /// know the package.
    async fn lookup(&self, package: &str) -> Result<Option<PackageVersions>>;

    /// Location of the source archive identified by `content_hash`.
    fn source_url(&self, identity: &PackageIdentity, content_hash: &str) -> String;
}
