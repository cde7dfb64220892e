pub mod application;
pub mod archive;
pub mod cleanup;
pub mod commands;
pub mod download;
pub mod error;
pub mod http;
pub mod manifest;
pub mod materialize;
pub mod package;
pub mod registry;
pub mod runtime;
pub mod shell;
pub mod shim;

/// Test utilities for cross-platform path handling.
#[cfg(test)]
pub mod test_utils {
    use crate::commands::config::TOKEN_ENV;
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;
    use std::path::PathBuf;

    /// Returns a test home directory path based on the platform.
    /// - Unix: `/home/user`
    /// - Windows: `C:\Users\user`
    pub fn test_home() -> PathBuf {
        #[cfg(not(windows))]
        {
            PathBuf::from("/home/user")
        }
        #[cfg(windows)]
        {
            PathBuf::from(r"C:\Users\user")
        }
    }

    /// Returns the default depot under [`test_home`].
    pub fn test_depot() -> PathBuf {
        test_home().join(".pkgapp")
    }

    /// Configure a mock runtime with common defaults for tests.
    /// - home dir set to [`test_home`]
    /// - no registry token
    /// - not privileged
    /// - canonicalize is a no-op passthrough
    pub fn configure_mock_runtime_basics(runtime: &mut MockRuntime) {
        runtime.expect_home_dir().returning(|| Some(test_home()));

        runtime
            .expect_env_var()
            .with(eq(TOKEN_ENV))
            .returning(|_| Err(std::env::VarError::NotPresent));

        runtime.expect_is_privileged().returning(|| false);

        runtime
            .expect_canonicalize()
            .returning(|p| Ok(p.to_path_buf()));
    }
}
