//! Subprocess execution.

use anyhow::{Context, Result, bail};
use log::debug;
use std::path::Path;
use std::process::Command;

use super::RealRuntime;

impl RealRuntime {
    #[tracing::instrument(skip(self))]
    pub(crate) fn run_impl(&self, program: &str, args: &[String], cwd: &Path) -> Result<String> {
        debug!("Running {} {:?} in {}", program, args, cwd.display());
        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .output()
            .with_context(|| format!("Failed to spawn {}", program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use crate::runtime::{RealRuntime, Runtime};
    use std::path::Path;

    #[test]
    fn test_run_captures_stdout() {
        let out = RealRuntime
            .run("echo", &["hello".to_string()], Path::new("/"))
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn test_run_non_zero_exit_is_error() {
        let result = RealRuntime.run("false", &[], Path::new("/"));
        assert!(result.is_err());
    }

    #[test]
    fn test_run_missing_program_is_error() {
        let result = RealRuntime.run("pkgapp-no-such-program", &[], Path::new("/"));
        assert!(result.is_err());
    }
}
