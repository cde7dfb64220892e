//! Adding the bin directory to PATH through the user's shell startup file.

use anyhow::{Context, Result, bail};
use log::{debug, info};
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;
use crate::shim::sh_quote;

pub const BLOCK_START: &str = "# >>> pkgapp >>>";
pub const BLOCK_END: &str = "# <<< pkgapp <<<";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    Bash,
    Zsh,
    Fish,
    Sh,
}

impl ShellKind {
    /// Classify a `$SHELL` value by its file name.
    pub fn from_shell_path(shell: &str) -> Self {
        let name = Path::new(shell)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match name.as_str() {
            "bash" => ShellKind::Bash,
            "zsh" => ShellKind::Zsh,
            "fish" => ShellKind::Fish,
            _ => ShellKind::Sh,
        }
    }

    pub fn startup_file(&self, home: &Path) -> PathBuf {
        match self {
            ShellKind::Bash => home.join(".bashrc"),
            ShellKind::Zsh => home.join(".zshrc"),
            ShellKind::Fish => home.join(".config").join("fish").join("config.fish"),
            ShellKind::Sh => home.join(".profile"),
        }
    }

    fn export_line(&self, bin_dir: &Path) -> String {
        let quoted = sh_quote(&bin_dir.to_string_lossy());
        match self {
            ShellKind::Fish => format!("set -gx PATH {} $PATH", quoted),
            _ => format!("export PATH={}:\"$PATH\"", quoted),
        }
    }

    pub fn block(&self, bin_dir: &Path) -> String {
        format!(
            "{}\n{}\n{}\n",
            BLOCK_START,
            self.export_line(bin_dir),
            BLOCK_END
        )
    }
}

/// Return `content` with the fenced block inserted, or replaced if present.
///
/// A start marker without a matching end marker is an error. The file is
/// left for the user to repair.
pub fn upsert_block(content: &str, block: &str) -> Result<String> {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.iter().position(|l| l.trim_end() == BLOCK_START);
    let end = start.and_then(|s| {
        lines[s..]
            .iter()
            .position(|l| l.trim_end() == BLOCK_END)
            .map(|e| s + e)
    });

    match (start, end) {
        (Some(start), None) => bail!(
            "Found `{}` on line {} without a closing `{}`",
            BLOCK_START,
            start + 1,
            BLOCK_END
        ),
        (Some(start), Some(end)) => {
            let mut out = String::new();
            for line in &lines[..start] {
                out.push_str(line);
                out.push('\n');
            }
            out.push_str(block);
            for line in &lines[end + 1..] {
                out.push_str(line);
                out.push('\n');
            }
            Ok(out)
        }
        (None, _) => {
            let mut out = content.to_string();
            if !out.is_empty() {
                if !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push('\n');
            }
            out.push_str(block);
            Ok(out)
        }
    }
}

/// Make `bin_dir` part of PATH for future shells. Returns whether the
/// startup file changed.
#[tracing::instrument(skip(runtime))]
pub fn add_bindir_to_path<R: Runtime>(runtime: &R, bin_dir: &Path) -> Result<bool> {
    let shell = runtime.env_var("SHELL").unwrap_or_default();
    let kind = ShellKind::from_shell_path(&shell);
    let home = runtime
        .home_dir()
        .context("Could not find home directory")?;
    let rc_file = kind.startup_file(&home);
    debug!("Shell {:?} uses startup file {:?}", kind, rc_file);

    let current = if runtime.exists(&rc_file) {
        runtime.read_to_string(&rc_file)?
    } else {
        String::new()
    };

    let updated = upsert_block(&current, &kind.block(bin_dir))
        .with_context(|| format!("Refusing to edit {}", rc_file.display()))?;
    if updated == current {
        info!("{} already adds {} to PATH", rc_file.display(), bin_dir.display());
        return Ok(false);
    }

    if let Some(parent) = rc_file.parent() {
        runtime.create_dir_all(parent)?;
    }
    runtime.write(&rc_file, updated.as_bytes())?;
    info!("Added {} to PATH in {}", bin_dir.display(), rc_file.display());
    Ok(true)
}
