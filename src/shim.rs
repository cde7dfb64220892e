//! Launcher shims.
//!
//! A shim is a tiny script in the bin directory that points the language
//! runtime at an app's environment and runs the app's module, forwarding
//! the caller's arguments untouched.

use anyhow::{Context, Result, bail};
use log::{debug, info};
use std::path::{Path, PathBuf};

use crate::package::AppDeclaration;
use crate::runtime::Runtime;

/// Marker line identifying files this crate generated.
pub const SHIM_MARKER: &str = "generated by pkgapp; do not edit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShimFlavor {
    Posix,
    Windows,
}

impl ShimFlavor {
    pub fn host() -> Self {
        if cfg!(windows) {
            ShimFlavor::Windows
        } else {
            ShimFlavor::Posix
        }
    }

    pub fn file_name(&self, app: &str) -> String {
        match self {
            ShimFlavor::Posix => app.to_string(),
            ShimFlavor::Windows => format!("{}.bat", app),
        }
    }

    /// Inverse of [`file_name`](Self::file_name).
    pub fn app_name(&self, file_name: &str) -> Option<String> {
        match self {
            ShimFlavor::Posix => Some(file_name.to_string()),
            ShimFlavor::Windows => {
                let lower = file_name.to_lowercase();
                lower
                    .ends_with(".bat")
                    .then(|| file_name[..file_name.len() - 4].to_string())
            }
        }
    }
}

/// How shims invoke the language runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimConfig {
    /// Runtime executable, as a path or a name looked up on PATH.
    pub runtime: String,
    /// Environment variable that selects the load path.
    pub load_path_var: String,
    /// Flags passed before every app's own launch options.
    pub fixed_args: Vec<String>,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            runtime: "julia".to_string(),
            load_path_var: "JULIA_LOAD_PATH".to_string(),
            fixed_args: vec!["--startup-file=no".to_string()],
        }
    }
}

/// Everything that goes into one shim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimTemplate {
    pub runtime: String,
    pub load_path_var: String,
    pub env_path: PathBuf,
    pub module: String,
    /// Runtime flags, placed before the module flag.
    pub launch_options: Vec<String>,
}

impl ShimTemplate {
    pub fn for_app(
        config: &ShimConfig,
        env_path: &Path,
        package: &str,
        app: &AppDeclaration,
    ) -> Self {
        Self {
            runtime: config.runtime.clone(),
            load_path_var: config.load_path_var.clone(),
            env_path: env_path.to_path_buf(),
            module: app.module(package).to_string(),
            launch_options: config
                .fixed_args
                .iter()
                .chain(&app.launch_options)
                .cloned()
                .collect(),
        }
    }

    pub fn render(&self, flavor: ShimFlavor) -> String {
        match flavor {
            ShimFlavor::Posix => self.render_posix(),
            ShimFlavor::Windows => self.render_batch(),
        }
    }

    fn render_posix(&self) -> String {
        let mut exec = vec![sh_quote(&self.runtime)];
        exec.extend(self.launch_options.iter().map(|o| sh_quote(o)));
        exec.push("-m".to_string());
        exec.push(sh_quote(&self.module));
        exec.push("\"$@\"".to_string());

        format!(
            "#!/bin/sh\n# {}\nexport {}={}\nexec {}\n",
            SHIM_MARKER,
            self.load_path_var,
            sh_quote(&self.env_path.to_string_lossy()),
            exec.join(" ")
        )
    }

    /// cmd.exe has no escape for `"` inside a quoted word.
    fn check_batch(&self) -> Result<()> {
        let env_path = self.env_path.to_string_lossy();
        let words = [self.runtime.as_str(), &*env_path, self.module.as_str()];
        for word in words
            .into_iter()
            .chain(self.launch_options.iter().map(String::as_str))
        {
            if word.contains('"') {
                bail!("Cannot write a batch shim for {:?}: it contains `\"`", word);
            }
        }
        Ok(())
    }

    fn render_batch(&self) -> String {
        let mut call = vec![bat_quote(&self.runtime)];
        call.extend(self.launch_options.iter().map(|o| bat_quote(o)));
        call.push("-m".to_string());
        call.push(bat_quote(&self.module));
        call.push("%*".to_string());

        format!(
            "@echo off\r\nrem {}\r\nset \"{}={}\"\r\n{}\r\n",
            SHIM_MARKER,
            self.load_path_var,
            bat_escape(&self.env_path.to_string_lossy()),
            call.join(" ")
        )
    }
}

/// Single-quote for POSIX sh. Embedded quotes become `'\''`.
pub fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn bat_escape(s: &str) -> String {
    s.replace('%', "%%")
}

/// Double-quote for cmd.exe with `%` doubled.
pub fn bat_quote(s: &str) -> String {
    format!("\"{}\"", bat_escape(s))
}

/// Writes, removes and lists shims in one bin directory.
pub struct ShimWriter<'a, R: Runtime> {
    runtime: &'a R,
    bin_dir: PathBuf,
    flavor: ShimFlavor,
}

impl<'a, R: Runtime> ShimWriter<'a, R> {
    pub fn new(runtime: &'a R, bin_dir: impl Into<PathBuf>, flavor: ShimFlavor) -> Self {
        Self {
            runtime,
            bin_dir: bin_dir.into(),
            flavor,
        }
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    pub fn shim_path(&self, app: &str) -> PathBuf {
        self.bin_dir.join(self.flavor.file_name(app))
    }

    /// Write (or overwrite) the shim for `app`.
    #[tracing::instrument(skip(self, template))]
    pub fn write(&self, app: &str, template: &ShimTemplate) -> Result<PathBuf> {
        if self.flavor == ShimFlavor::Windows {
            template.check_batch()?;
        }
        self.runtime
            .create_dir_all(&self.bin_dir)
            .with_context(|| format!("Failed to create bin directory {}", self.bin_dir.display()))?;

        let path = self.shim_path(app);
        self.runtime
            .write(&path, template.render(self.flavor).as_bytes())
            .with_context(|| format!("Failed to write shim for `{}`", app))?;

        if self.flavor == ShimFlavor::Posix {
            self.runtime.set_permissions(&path, 0o755)?;
        }

        info!("Wrote shim {}", path.display());
        Ok(path)
    }

    /// Delete the shim for `app`. Returns whether a file was removed.
    #[tracing::instrument(skip(self))]
    pub fn remove(&self, app: &str) -> Result<bool> {
        let path = self.shim_path(app);
        if !self.runtime.exists(&path) {
            debug!("No shim at {:?}", path);
            return Ok(false);
        }
        self.runtime.remove_file(&path)?;
        info!("Removed shim {}", path.display());
        Ok(true)
    }

    /// App names of every generated shim in the bin directory. Files without
    /// the marker are not ours and are skipped.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.runtime.is_dir(&self.bin_dir) {
            return Ok(Vec::new());
        }

        let mut apps = Vec::new();
        for path in self.runtime.read_dir(&self.bin_dir)? {
            let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                continue;
            };
            let Some(app) = self.flavor.app_name(&file_name) else {
                continue;
            };
            if self.runtime.is_dir(&path) {
                continue;
            }
            match self.runtime.read_to_string(&path) {
                Ok(content) if content.contains(SHIM_MARKER) => apps.push(app),
                Ok(_) => debug!("Skipping foreign file {:?}", path),
                Err(e) => debug!("Skipping unreadable {:?}: {}", path, e),
            }
        }
        Ok(apps)
    }
}
