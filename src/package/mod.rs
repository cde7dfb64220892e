//! Packages: identities, version constraints, install specs and project
//! descriptors.

mod project;
mod spec;
mod version;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use project::{AppDeclaration, PROJECT_FILE, Project};
pub use spec::{PackageSpec, validate_package_name};
pub use version::{VersionConstraint, VersionEntry, VersionResolver};

/// A package's stable identity. The name alone is not unique across
/// registries; the uuid is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub name: String,
    pub uuid: Uuid,
}

impl PackageIdentity {
    pub fn new(name: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            name: name.into(),
            uuid,
        }
    }

    /// Directory name of this identity's environment: `<name>-<uuid>`.
    pub fn env_dir_name(&self) -> String {
        format!("{}-{}", self.name, self.uuid)
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.uuid)
    }
}
