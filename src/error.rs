//! Domain errors and install stages.
//!
//! I/O and network failures travel as `anyhow::Error` with context. The
//! failures a caller may want to branch on are [`AppError`] variants, and
//! every orchestrated operation attaches the [`InstallStage`] it failed in as
//! context. Both can be recovered with `anyhow::Error::downcast_ref`.

use std::fmt;
use std::path::PathBuf;

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("no eligible version of package `{name}` matches `{constraint}`")]
    PackageNotFound { name: String, constraint: String },

    #[error("package `{name}` is registered with different UUIDs ({first} in {first_registry}, {second} in {second_registry})")]
    AmbiguousPackage {
        name: String,
        first: Uuid,
        first_registry: String,
        second: Uuid,
        second_registry: String,
    },

    #[error("project file not found: {}", path.display())]
    ProjectFileMissing { path: PathBuf },

    #[error("no apps found in package `{package}`")]
    NoAppsDeclared { package: String },

    #[error("source for `{expected}` declares a different package `{found}`")]
    IdentityMismatch { expected: String, found: String },

    #[error("content hash mismatch for {url}: expected {expected}, got {actual}")]
    HashMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("app manifest {} is corrupt: {reason}", path.display())]
    ManifestCorrupt { path: PathBuf, reason: String },

    #[error("`{0}` is neither an installed package nor an installed app")]
    NotInstalled(String),
}

/// Stages of an `add`/`develop` attempt, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    Resolving,
    Materializing,
    ReadingAppDeclarations,
    UpdatingManifest,
    GeneratingShims,
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            InstallStage::Resolving => "resolving package version",
            InstallStage::Materializing => "materializing environment",
            InstallStage::ReadingAppDeclarations => "reading app declarations",
            InstallStage::UpdatingManifest => "updating app manifest",
            InstallStage::GeneratingShims => "generating app shims",
        };
        write!(f, "failed while {}", stage)
    }
}
