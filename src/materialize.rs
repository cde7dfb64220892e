//! Environment materialization.
//!
//! Copy and git modes build the new environment under the staging directory
//! and only rename it into `<env_root>/<name>-<uuid>` once the source has
//! been verified and its descriptor read. Link mode points at an existing
//! checkout and never copies.

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::archive::ArchiveExtractorImpl;
use crate::cleanup::{CleanupGuard, SharedCleanupContext};
use crate::commands::paths::AppPaths;
use crate::download::{download_file, sha256_file, verify_sha256};
use crate::error::{AppError, InstallStage};
use crate::http::HttpClient;
use crate::manifest::PackageSource;
use crate::package::{PackageIdentity, Project};
use crate::registry::ResolvedVersion;
use crate::runtime::Runtime;

/// What to materialize.
#[derive(Debug, Clone, PartialEq)]
pub enum MaterializeRequest {
    Registry(ResolvedVersion),
    Archive { url: String },
    Git { url: String, rev: Option<String> },
    Link { path: PathBuf },
}

/// A ready environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Materialized {
    pub path: PathBuf,
    pub project: Project,
    pub source: PackageSource,
}

struct Staging {
    dir: PathBuf,
    guard: CleanupGuard,
}

pub struct Materializer<'a, R: Runtime> {
    runtime: &'a R,
    paths: &'a AppPaths,
    http_client: &'a HttpClient,
    extractor: ArchiveExtractorImpl,
    cleanup_ctx: SharedCleanupContext,
}

/// A revision that names a commit rather than a branch or tag.
fn is_commit_like(rev: &str) -> bool {
    (7..=40).contains(&rev.len()) && rev.chars().all(|c| c.is_ascii_hexdigit())
}

/// File name for a downloaded archive, keeping the extension the extractor
/// dispatches on.
fn archive_file_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or_default().to_lowercase();
    if last.ends_with(".zip") {
        "source.zip".to_string()
    } else if last.ends_with(".tgz") {
        "source.tgz".to_string()
    } else {
        "source.tar.gz".to_string()
    }
}

impl<'a, R: Runtime> Materializer<'a, R> {
    pub fn new(
        runtime: &'a R,
        paths: &'a AppPaths,
        http_client: &'a HttpClient,
        cleanup_ctx: SharedCleanupContext,
    ) -> Self {
        Self {
            runtime,
            paths,
            http_client,
            extractor: ArchiveExtractorImpl::new(),
            cleanup_ctx,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn materialize(&self, request: &MaterializeRequest) -> Result<Materialized> {
        let staging = match request {
            MaterializeRequest::Link { path } => return self.link(path),
            _ => self.stage()?,
        };

        let result = match request {
            MaterializeRequest::Registry(resolved) => {
                self.fetch_registry(&staging.dir, resolved).await
            }
            MaterializeRequest::Archive { url } => self.fetch_archive(&staging.dir, url).await,
            MaterializeRequest::Git { url, rev } => {
                self.clone_git(&staging.dir, url, rev.as_deref())
            }
            MaterializeRequest::Link { path } => self.link(path),
        };
        self.finish(staging, result)
    }

    fn stage(&self) -> Result<Staging> {
        let dir = self.paths.staging_dir().join(Uuid::new_v4().to_string());
        self.runtime
            .create_dir_all(&dir)
            .context("Failed to create staging directory")?;
        let guard = CleanupGuard::new(self.cleanup_ctx.clone(), dir.clone());
        debug!("Staging in {:?}", dir);
        Ok(Staging { dir, guard })
    }

    fn finish(&self, staging: Staging, result: Result<Materialized>) -> Result<Materialized> {
        if self.runtime.exists(&staging.dir)
            && let Err(e) = self.runtime.remove_dir_all(&staging.dir)
        {
            warn!("Failed to remove staging directory {:?}: {}", staging.dir, e);
            return result;
        }
        staging.guard.success();
        result
    }

    /// Read the staged descriptor. Apps are required before anything is
    /// committed.
    fn read_project(&self, tree: &Path) -> Result<Project> {
        let project = Project::load(self.runtime, tree)
            .and_then(|p| p.require_apps().map(|_| p))
            .context(InstallStage::ReadingAppDeclarations)?;
        Ok(project)
    }

    /// Replace the identity's environment with `tree`.
    fn commit(&self, tree: &Path, identity: &PackageIdentity) -> Result<PathBuf> {
        let target = self.paths.env_dir(&identity.env_dir_name());
        if !self.paths.is_managed_env(&target) {
            bail!(
                "Environment {} for {} is outside {}",
                target.display(),
                identity,
                self.paths.env_root.display()
            );
        }
        if self.runtime.exists(&target) {
            debug!("Removing previous environment {:?}", target);
            self.runtime.remove_dir_all(&target)?;
        }
        self.runtime.rename(tree, &target)?;
        info!("Environment for {} is at {}", identity, target.display());
        Ok(target)
    }

    async fn fetch_registry(&self, staging: &Path, resolved: &ResolvedVersion) -> Result<Materialized> {
        let archive = staging.join("source.tar.gz");
        download_file(self.runtime, &resolved.source_url, &archive, self.http_client).await?;
        verify_sha256(
            self.runtime,
            &archive,
            &resolved.source_url,
            &resolved.content_hash,
        )?;

        let tree = staging.join("tree");
        self.extractor.extract_with_cleanup(
            self.runtime,
            &archive,
            &tree,
            self.cleanup_ctx.clone(),
        )?;

        let project = self.read_project(&tree)?;
        if project.identity != resolved.identity {
            return Err(AppError::IdentityMismatch {
                expected: resolved.identity.to_string(),
                found: project.identity.to_string(),
            }
            .into());
        }

        let path = self.commit(&tree, &resolved.identity)?;
        Ok(Materialized {
            path,
            project,
            source: PackageSource::Registry {
                registry: resolved.registry.clone(),
                version: resolved.version.clone(),
                content_hash: resolved.content_hash.clone(),
            },
        })
    }

    async fn fetch_archive(&self, staging: &Path, url: &str) -> Result<Materialized> {
        let archive = staging.join(archive_file_name(url));
        download_file(self.runtime, url, &archive, self.http_client).await?;
        let content_hash = sha256_file(self.runtime, &archive)?;

        let tree = staging.join("tree");
        self.extractor.extract_with_cleanup(
            self.runtime,
            &archive,
            &tree,
            self.cleanup_ctx.clone(),
        )?;

        let project = self.read_project(&tree)?;
        let path = self.commit(&tree, &project.identity)?;
        Ok(Materialized {
            path,
            project,
            source: PackageSource::Archive {
                url: url.to_string(),
                content_hash,
            },
        })
    }

    fn clone_git(&self, staging: &Path, url: &str, rev: Option<&str>) -> Result<Materialized> {
        let tree = staging.join("tree");
        let tree_arg = tree.to_string_lossy().into_owned();

        let mut args: Vec<String> = vec!["clone".into()];
        match rev {
            Some(rev) if is_commit_like(rev) => {}
            Some(rev) => args.extend(["--depth".into(), "1".into(), "--branch".into(), rev.into()]),
            None => args.extend(["--depth".into(), "1".into()]),
        }
        args.extend(["--".into(), url.into(), tree_arg]);

        info!("Cloning {}...", url);
        self.runtime
            .run("git", &args, staging)
            .with_context(|| format!("Failed to clone {}", url))?;

        if let Some(rev) = rev.filter(|r| is_commit_like(r)) {
            self.runtime
                .run(
                    "git",
                    &["checkout".into(), "--detach".into(), rev.into()],
                    &tree,
                )
                .with_context(|| format!("Failed to check out {}", rev))?;
        }

        let head = self
            .runtime
            .run("git", &["rev-parse".into(), "HEAD".into()], &tree)
            .context("Failed to read the cloned revision")?;
        self.runtime.remove_dir_all(&tree.join(".git"))?;

        let project = self.read_project(&tree)?;
        let path = self.commit(&tree, &project.identity)?;
        Ok(Materialized {
            path,
            project,
            source: PackageSource::Git {
                url: url.to_string(),
                rev: head,
            },
        })
    }

    fn link(&self, path: &Path) -> Result<Materialized> {
        let path = self
            .runtime
            .canonicalize(path)
            .with_context(|| format!("Cannot develop {}", path.display()))?;
        if !self.runtime.is_dir(&path) {
            bail!("{} is not a directory", path.display());
        }

        let project = self.read_project(&path)?;
        info!("Linking {} at {}", project.identity, path.display());
        Ok(Materialized {
            source: PackageSource::Path { path: path.clone() },
            path,
            project,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup;
    use crate::package::PROJECT_FILE;
    use crate::runtime::{MockRuntime, RealRuntime};
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use reqwest::Client;
    use semver::Version;
    use sha2::{Digest, Sha256};
    use std::fs;
    use tempfile::tempdir;

    const UUID: &str = "8f3c2c4e-1c5b-4f8e-9a53-3a3e4d6b7c10";

    fn project_toml(name: &str, uuid: &str) -> String {
        format!("name = \"{name}\"\nuuid = \"{uuid}\"\nversion = \"1.2.0\"\n\n[apps.foo]\n")
    }

    fn tarball(files: &[(&str, String)]) -> Vec<u8> {
        let mut tar = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append(&header, content.as_bytes()).unwrap();
        }
        tar.into_inner().unwrap().finish().unwrap()
    }

    fn resolved(url: String, body: &[u8]) -> ResolvedVersion {
        ResolvedVersion {
            identity: PackageIdentity::new("Foo", Uuid::parse_str(UUID).unwrap()),
            version: Version::new(1, 2, 0),
            content_hash: hex::encode(Sha256::digest(body)),
            source_url: url,
            registry: "General".into(),
        }
    }

    #[test]
    fn test_archive_file_name() {
        assert_eq!(archive_file_name("https://x/Foo.zip?token=1"), "source.zip");
        assert_eq!(archive_file_name("https://x/Foo.TGZ"), "source.tgz");
        assert_eq!(archive_file_name("https://x/Foo.tar.gz"), "source.tar.gz");
    }

    #[test]
    fn test_is_commit_like() {
        assert!(is_commit_like("0123abc"));
        assert!(is_commit_like("0123456789abcdef0123456789abcdef01234567"));
        assert!(!is_commit_like("main"));
        assert!(!is_commit_like("v1.0.0"));
        assert!(!is_commit_like("abc"));
    }

    #[tokio::test]
    async fn test_registry_materialization_commits_environment() {
        let dir = tempdir().unwrap();
        let paths = AppPaths::new(dir.path());
        let body = tarball(&[
            ("Foo-1.2.0/Project.toml", project_toml("Foo", UUID)),
            ("Foo-1.2.0/src/Foo.jl", "module Foo end".into()),
        ]);

        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/src.tar.gz")
            .with_status(200)
            .with_body(body.clone())
            .create_async()
            .await;

        let http = HttpClient::new(Client::new());
        let ctx = cleanup::new_shared();
        let materializer = Materializer::new(&RealRuntime, &paths, &http, ctx.clone());
        let request =
            MaterializeRequest::Registry(resolved(format!("{}/src.tar.gz", server.url()), &body));

        let materialized = materializer.materialize(&request).await.unwrap();

        let expected = paths.env_dir(&format!("Foo-{UUID}"));
        assert_eq!(materialized.path, expected);
        assert!(expected.join(PROJECT_FILE).exists());
        assert!(expected.join("src/Foo.jl").exists());
        assert!(matches!(
            materialized.source,
            PackageSource::Registry { ref registry, .. } if registry == "General"
        ));
        // Staging is gone and nothing is left registered for cleanup
        assert_eq!(fs::read_dir(paths.staging_dir()).unwrap().count(), 0);
        assert!(cleanup::lock(&ctx).paths.is_empty());
    }

    #[tokio::test]
    async fn test_hash_mismatch_leaves_previous_environment() {
        let dir = tempdir().unwrap();
        let paths = AppPaths::new(dir.path());
        let previous = paths.env_dir(&format!("Foo-{UUID}"));
        fs::create_dir_all(&previous).unwrap();
        fs::write(previous.join("marker"), "old").unwrap();

        let body = tarball(&[("Foo/Project.toml", project_toml("Foo", UUID))]);
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/src.tar.gz")
            .with_status(200)
            .with_body("tampered")
            .create_async()
            .await;

        let http = HttpClient::new(Client::new());
        let materializer = Materializer::new(&RealRuntime, &paths, &http, cleanup::new_shared());
        let request =
            MaterializeRequest::Registry(resolved(format!("{}/src.tar.gz", server.url()), &body));

        let err = materializer.materialize(&request).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<AppError>(),
            Some(AppError::HashMismatch { .. })
        ));
        assert_eq!(fs::read_to_string(previous.join("marker")).unwrap(), "old");
        assert_eq!(fs::read_dir(paths.staging_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_identity_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let paths = AppPaths::new(dir.path());
        let body = tarball(&[(
            "Bar/Project.toml",
            project_toml("Bar", "00000000-0000-0000-0000-000000000002"),
        )]);

        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/src.tar.gz")
            .with_status(200)
            .with_body(body.clone())
            .create_async()
            .await;

        let http = HttpClient::new(Client::new());
        let materializer = Materializer::new(&RealRuntime, &paths, &http, cleanup::new_shared());
        let request =
            MaterializeRequest::Registry(resolved(format!("{}/src.tar.gz", server.url()), &body));

        let err = materializer.materialize(&request).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AppError>(),
            Some(AppError::IdentityMismatch { .. })
        ));
        assert!(!paths.env_root.join("Bar-00000000-0000-0000-0000-000000000002").exists());
    }

    #[tokio::test]
    async fn test_archive_without_apps_fails_before_commit() {
        let dir = tempdir().unwrap();
        let paths = AppPaths::new(dir.path());
        let body = tarball(&[(
            "Foo/Project.toml",
            format!("name = \"Foo\"\nuuid = \"{UUID}\"\n"),
        )]);

        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/Foo.tar.gz")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let http = HttpClient::new(Client::new());
        let materializer = Materializer::new(&RealRuntime, &paths, &http, cleanup::new_shared());
        let request = MaterializeRequest::Archive {
            url: format!("{}/Foo.tar.gz", server.url()),
        };

        let err = materializer.materialize(&request).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<InstallStage>(),
            Some(&InstallStage::ReadingAppDeclarations)
        );
        assert!(matches!(
            err.downcast_ref::<AppError>(),
            Some(AppError::NoAppsDeclared { .. })
        ));
        assert!(!paths.env_dir(&format!("Foo-{UUID}")).exists());
    }

    #[tokio::test]
    async fn test_archive_with_traversal_name_is_rejected() {
        let dir = tempdir().unwrap();
        let paths = AppPaths::new(dir.path().join("depot"));
        let body = tarball(&[(
            "Foo/Project.toml",
            project_toml("../../../escaped", UUID),
        )]);

        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/Foo.tar.gz")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let http = HttpClient::new(Client::new());
        let materializer = Materializer::new(&RealRuntime, &paths, &http, cleanup::new_shared());
        let result = materializer
            .materialize(&MaterializeRequest::Archive {
                url: format!("{}/Foo.tar.gz", server.url()),
            })
            .await;

        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid package name"));
        assert!(!dir.path().join(format!("escaped-{UUID}")).exists());
        assert!(!paths.depot.join(format!("escaped-{UUID}")).exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_commit_refuses_target_outside_env_root() {
        let dir = tempdir().unwrap();
        let paths = AppPaths::new(dir.path().join("depot"));
        let outside = dir.path().join(format!("escaped-{UUID}"));
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("keep.txt"), "user data").unwrap();
        let tree = dir.path().join("tree");
        fs::create_dir_all(&tree).unwrap();

        let http = HttpClient::new(Client::new());
        let materializer = Materializer::new(&RealRuntime, &paths, &http, cleanup::new_shared());
        let identity = PackageIdentity::new("../../escaped", Uuid::parse_str(UUID).unwrap());

        assert!(materializer.commit(&tree, &identity).is_err());
        assert!(outside.join("keep.txt").exists());
        assert!(tree.exists());
    }

    #[tokio::test]
    async fn test_archive_records_computed_hash() {
        let dir = tempdir().unwrap();
        let paths = AppPaths::new(dir.path());
        let body = tarball(&[("Foo/Project.toml", project_toml("Foo", UUID))]);

        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/Foo.tar.gz")
            .with_status(200)
            .with_body(body.clone())
            .create_async()
            .await;

        let http = HttpClient::new(Client::new());
        let materializer = Materializer::new(&RealRuntime, &paths, &http, cleanup::new_shared());
        let url = format!("{}/Foo.tar.gz", server.url());

        let materialized = materializer
            .materialize(&MaterializeRequest::Archive { url: url.clone() })
            .await
            .unwrap();

        assert_eq!(
            materialized.source,
            PackageSource::Archive {
                url,
                content_hash: hex::encode(Sha256::digest(&body)),
            }
        );
    }

    #[tokio::test]
    async fn test_link_mode_never_copies() {
        let dir = tempdir().unwrap();
        let paths = AppPaths::new(dir.path().join("depot"));
        let checkout = dir.path().join("Foo");
        fs::create_dir_all(&checkout).unwrap();
        fs::write(checkout.join(PROJECT_FILE), project_toml("Foo", UUID)).unwrap();

        let http = HttpClient::new(Client::new());
        let materializer = Materializer::new(&RealRuntime, &paths, &http, cleanup::new_shared());

        let materialized = materializer
            .materialize(&MaterializeRequest::Link {
                path: checkout.clone(),
            })
            .await
            .unwrap();

        let canonical = fs::canonicalize(&checkout).unwrap();
        assert_eq!(materialized.path, canonical);
        assert_eq!(materialized.source, PackageSource::Path { path: canonical });
        assert!(!paths.env_root.exists());
    }

    #[tokio::test]
    async fn test_link_mode_missing_project() {
        let dir = tempdir().unwrap();
        let paths = AppPaths::new(dir.path().join("depot"));
        let http = HttpClient::new(Client::new());
        let materializer = Materializer::new(&RealRuntime, &paths, &http, cleanup::new_shared());

        let err = materializer
            .materialize(&MaterializeRequest::Link {
                path: dir.path().to_path_buf(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AppError>(),
            Some(AppError::ProjectFileMissing { .. })
        ));
    }

    #[tokio::test]
    async fn test_git_mode_runs_clone_and_records_head() {
        let paths = AppPaths::new("/depot");
        let mut runtime = MockRuntime::new();

        runtime.expect_create_dir_all().returning(|_| Ok(()));
        runtime
            .expect_run()
            .withf(|program, args, _| {
                program == "git"
                    && args.len() == 8
                    && args[..5] == ["clone", "--depth", "1", "--branch", "v2"]
                    && args[5] == "--"
                    && args[6] == "https://example.com/Foo.git"
            })
            .times(1)
            .returning(|_, _, _| Ok(String::new()));
        runtime
            .expect_run()
            .withf(|program, args, _| program == "git" && args == ["rev-parse", "HEAD"])
            .times(1)
            .returning(|_, _, _| Ok("0123456789abcdef0123456789abcdef01234567".into()));
        runtime
            .expect_remove_dir_all()
            .returning(|_| Ok(()));
        runtime
            .expect_exists()
            .withf(|p| p.ends_with(PROJECT_FILE))
            .returning(|_| true);
        runtime
            .expect_read_to_string()
            .returning(|_| Ok(project_toml("Foo", UUID)));
        runtime
            .expect_exists()
            .withf(|p| p.ends_with(format!("Foo-{UUID}")))
            .returning(|_| false);
        runtime
            .expect_rename()
            .withf(|from, to| from.ends_with("tree") && to == Path::new("/depot/apps/envs").join(format!("Foo-{UUID}")))
            .times(1)
            .returning(|_, _| Ok(()));
        runtime.expect_exists().returning(|_| true);

        let http = HttpClient::new(Client::new());
        let materializer = Materializer::new(&runtime, &paths, &http, cleanup::new_shared());

        let materialized = materializer
            .materialize(&MaterializeRequest::Git {
                url: "https://example.com/Foo.git".into(),
                rev: Some("v2".into()),
            })
            .await
            .unwrap();

        assert_eq!(
            materialized.source,
            PackageSource::Git {
                url: "https://example.com/Foo.git".into(),
                rev: "0123456789abcdef0123456789abcdef01234567".into(),
            }
        );
    }
}
