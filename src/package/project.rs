//! Project descriptor (`Project.toml`) reading.

use anyhow::{Context, Result, bail};
use log::debug;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

use super::{PackageIdentity, validate_package_name};
use crate::error::AppError;
use crate::runtime::Runtime;

pub const PROJECT_FILE: &str = "Project.toml";

/// One command-line app declared under `[apps]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDeclaration {
    pub name: String,
    /// Module to run instead of the package's own module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    /// Runtime flags placed before the module flag.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub launch_options: Vec<String>,
}

impl AppDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: None,
            launch_options: Vec::new(),
        }
    }

    /// The module the shim runs: `entry` if set, otherwise the package name.
    pub fn module<'a>(&'a self, package: &'a str) -> &'a str {
        self.entry.as_deref().unwrap_or(package)
    }
}

#[derive(Debug, Deserialize)]
struct RawProject {
    name: Option<String>,
    uuid: Option<String>,
    version: Option<String>,
    #[serde(default)]
    apps: BTreeMap<String, RawApp>,
}

#[derive(Debug, Default, Deserialize)]
struct RawApp {
    entry: Option<String>,
    #[serde(default)]
    launch_options: Vec<String>,
}

/// A parsed project descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub identity: PackageIdentity,
    pub version: Option<Version>,
    pub apps: BTreeMap<String, AppDeclaration>,
}

impl Project {
    /// Read `<dir>/Project.toml`.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime + ?Sized>(runtime: &R, dir: &Path) -> Result<Self> {
        let path = dir.join(PROJECT_FILE);
        if !runtime.exists(&path) {
            return Err(AppError::ProjectFileMissing { path }.into());
        }

        let content = runtime.read_to_string(&path)?;
        let project = Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        debug!(
            "Loaded project {} with {} app(s) from {:?}",
            project.identity,
            project.apps.len(),
            path
        );
        Ok(project)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawProject = toml::from_str(content).context("Invalid TOML")?;

        let Some(name) = raw.name else {
            bail!("Project has no `name` field");
        };
        validate_package_name(&name)?;
        let Some(uuid) = raw.uuid else {
            bail!("Project `{}` has no `uuid` field", name);
        };
        let uuid = Uuid::parse_str(&uuid)
            .with_context(|| format!("Project `{}` has an invalid uuid `{}`", name, uuid))?;
        let version = raw
            .version
            .map(|v| Version::parse(&v).with_context(|| format!("Invalid version `{}`", v)))
            .transpose()?;

        let mut project = Project {
            identity: PackageIdentity::new(name, uuid),
            version,
            apps: BTreeMap::new(),
        };
        for (app_name, app) in raw.apps {
            project.add_app(AppDeclaration {
                name: app_name,
                entry: app.entry,
                launch_options: app.launch_options,
            })?;
        }
        Ok(project)
    }

    /// Insert a declaration. A later declaration with the same name replaces
    /// the earlier one.
    pub fn add_app(&mut self, app: AppDeclaration) -> Result<()> {
        validate_app_name(&app.name)?;
        self.apps.insert(app.name.clone(), app);
        Ok(())
    }

    /// Fail with [`AppError::NoAppsDeclared`] when the project declares no apps.
    pub fn require_apps(&self) -> Result<()> {
        if self.apps.is_empty() {
            return Err(AppError::NoAppsDeclared {
                package: self.identity.name.clone(),
            }
            .into());
        }
        Ok(())
    }
}

/// App names become shim file names.
fn validate_app_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', ':'])
        || name.chars().any(char::is_whitespace)
    {
        bail!("Invalid app name `{}`", name);
    }
    Ok(())
}
