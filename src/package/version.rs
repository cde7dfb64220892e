//! Version constraints and selection.
//!
//! Selection is a pure function over the version index a registry publishes:
//! yanked entries are never eligible, and among the eligible entries the
//! highest semantic version wins.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

/// Which versions of a package the caller accepts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VersionConstraint {
    /// Highest non-prerelease version
    #[default]
    Latest,
    /// Exactly this version (e.g. `1.2.3`)
    Exact(Version),
    /// Any version matching a requirement (e.g. `^1.2`, `>=1, <2`)
    Range(VersionReq),
}

impl VersionConstraint {
    /// Check whether `version` satisfies this constraint.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionConstraint::Latest => version.pre.is_empty(),
            VersionConstraint::Exact(exact) => exact == version,
            VersionConstraint::Range(req) => req.matches(version),
        }
    }
}

impl FromStr for VersionConstraint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("latest") {
            return Ok(VersionConstraint::Latest);
        }

        let bare = s.strip_prefix('v').unwrap_or(s);
        if let Ok(version) = Version::parse(bare) {
            return Ok(VersionConstraint::Exact(version));
        }

        let req = VersionReq::parse(s)
            .with_context(|| format!("Invalid version constraint `{}`", s))?;
        Ok(VersionConstraint::Range(req))
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Latest => write!(f, "latest"),
            VersionConstraint::Exact(version) => write!(f, "={}", version),
            VersionConstraint::Range(req) => write!(f, "{}", req),
        }
    }
}

/// One published version in a registry's index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: Version,
    /// Hex SHA-256 of the source archive.
    pub content_hash: String,
    #[serde(default)]
    pub yanked: bool,
}

impl VersionEntry {
    pub fn new(version: Version, content_hash: impl Into<String>) -> Self {
        Self {
            version,
            content_hash: content_hash.into(),
            yanked: false,
        }
    }

    pub fn yanked(mut self) -> Self {
        self.yanked = true;
        self
    }
}

/// Version resolver - pure functions over version indexes.
pub struct VersionResolver;

impl VersionResolver {
    /// An entry is eligible when it is not yanked and satisfies the constraint.
    /// Yanked entries are rejected even when the constraint names them exactly.
    pub fn is_eligible(entry: &VersionEntry, constraint: &VersionConstraint) -> bool {
        !entry.yanked && constraint.matches(&entry.version)
    }

    /// Pick the highest eligible entry, or `None` if nothing qualifies.
    /// On duplicate versions the first entry is kept.
    pub fn select<'a>(
        entries: &'a [VersionEntry],
        constraint: &VersionConstraint,
    ) -> Option<&'a VersionEntry> {
        entries
            .iter()
            .filter(|e| Self::is_eligible(e, constraint))
            .fold(None, |best: Option<&VersionEntry>, entry| match best {
                Some(b) if b.version >= entry.version => Some(b),
                _ => Some(entry),
            })
    }
}
