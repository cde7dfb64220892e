//! The app manifest: which packages are installed, from where, and which
//! apps each of them exposes.

mod store;

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::package::{AppDeclaration, PackageIdentity};

pub use store::ManifestStore;

/// Format version written into new manifests.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// How an installed package was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PackageSource {
    Registry {
        registry: String,
        version: Version,
        content_hash: String,
    },
    Archive {
        url: String,
        content_hash: String,
    },
    Git {
        url: String,
        rev: String,
    },
    /// Linked development checkout. Never deleted by `rm`.
    Path { path: PathBuf },
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageSource::Registry { registry, .. } => write!(f, "registry {}", registry),
            PackageSource::Archive { url, .. } => write!(f, "{}", url),
            PackageSource::Git { url, .. } => write!(f, "{}", url),
            PackageSource::Path { path } => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackageEntry {
    pub identity: PackageIdentity,
    pub source: PackageSource,
    /// Environment directory, or the checkout for linked packages.
    pub path: PathBuf,
    #[serde(default)]
    pub apps: BTreeMap<String, AppDeclaration>,
}

impl InstalledPackageEntry {
    /// Version for registry installs, otherwise the revision or hash that
    /// pins the source.
    pub fn version_or_revision(&self) -> String {
        match &self.source {
            PackageSource::Registry { version, .. } => version.to_string(),
            PackageSource::Archive { content_hash, .. } => {
                format!("sha256:{}", short(content_hash))
            }
            PackageSource::Git { rev, .. } => short(rev),
            PackageSource::Path { .. } => "dev".to_string(),
        }
    }

    pub fn is_linked(&self) -> bool {
        matches!(self.source, PackageSource::Path { .. })
    }
}

fn short(hash: &str) -> String {
    hash.chars().take(12).collect()
}

/// Result of removing a single app.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedApp {
    pub app: AppDeclaration,
    /// The whole entry, when the removed app was its last one.
    pub package: Option<InstalledPackageEntry>,
}

/// Result of an upsert.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpsertOutcome {
    pub previous: Option<InstalledPackageEntry>,
    /// Apps of other packages whose names the new entry took over.
    pub displaced: Vec<(PackageIdentity, String)>,
    /// Entries that lost their last app to the new entry.
    pub dropped: Vec<InstalledPackageEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppManifest {
    pub version: u32,
    #[serde(default)]
    pub packages: BTreeMap<Uuid, InstalledPackageEntry>,
}

impl Default for AppManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_FORMAT_VERSION,
            packages: BTreeMap::new(),
        }
    }
}

impl AppManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&InstalledPackageEntry> {
        self.packages.get(uuid)
    }

    pub fn entries(&self) -> impl Iterator<Item = &InstalledPackageEntry> {
        self.packages.values()
    }

    /// Insert or replace the entry for `entry.identity.uuid`. Apps are
    /// replaced wholesale. An app name can only belong to one package, so the
    /// same names are taken away from every other entry.
    pub fn upsert(&mut self, entry: InstalledPackageEntry) -> UpsertOutcome {
        let uuid = entry.identity.uuid;
        let mut displaced = Vec::new();
        let mut dropped = Vec::new();

        let others: Vec<Uuid> = self.packages.keys().filter(|u| **u != uuid).copied().collect();
        for other in others {
            for app in entry.apps.keys() {
                let Some(owner) = self.packages.get(&other).map(|e| e.identity.clone()) else {
                    break;
                };
                if let Some(removed) = self.remove_app(&other, app) {
                    displaced.push((owner, app.clone()));
                    dropped.extend(removed.package);
                }
            }
        }

        let previous = self.packages.insert(uuid, entry);
        UpsertOutcome {
            previous,
            displaced,
            dropped,
        }
    }

    pub fn remove_package(&mut self, uuid: &Uuid) -> Option<InstalledPackageEntry> {
        self.packages.remove(uuid)
    }

    /// Remove one app. Removing the last app removes the whole entry.
    pub fn remove_app(&mut self, uuid: &Uuid, app: &str) -> Option<RemovedApp> {
        let entry = self.packages.get_mut(uuid)?;
        let removed = entry.apps.remove(app)?;
        let package = if entry.apps.is_empty() {
            self.remove_package(uuid)
        } else {
            None
        };
        Some(RemovedApp {
            app: removed,
            package,
        })
    }

    pub fn find_by_app(&self, app: &str) -> Option<&InstalledPackageEntry> {
        self.packages.values().find(|e| e.apps.contains_key(app))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&InstalledPackageEntry> {
        self.packages.values().find(|e| e.identity.name == name)
    }
}
