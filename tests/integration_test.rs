use assert_cmd::Command;
use assert_cmd::cargo;
use flate2::Compression;
use flate2::write::GzEncoder;
use mockito::Server;
use predicates::prelude::*;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::prelude::*;
use std::path::Path;
use tar::Builder;
use tempfile::tempdir;

const UUID: &str = "8f3c2c4e-1c5b-4f8e-9a53-3a3e4d6b7c10";

const PROJECT: &str = r#"
name = "Hello"
uuid = "8f3c2c4e-1c5b-4f8e-9a53-3a3e4d6b7c10"
version = "1.0.0"

[apps.hello]

[apps.hello-admin]
entry = "Hello.Admin"
launch_options = ["--threads=2"]
"#;

fn create_tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let mut tar_builder = Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_path(name).unwrap();
        header.set_mode(0o644);
        header.set_cksum();
        tar_builder.append(&header, content.as_bytes()).unwrap();
    }
    let tar = tar_builder.into_inner().unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

fn source_archive() -> Vec<u8> {
    create_tar_gz(&[
        ("Hello/Project.toml", PROJECT),
        ("Hello/src/Hello.jl", "module Hello end\n"),
    ])
}

/// Serve `Hello` 1.0.0 from a registry rooted at the mock server.
fn serve_registry(server: &mut mockito::ServerGuard) {
    let archive = source_archive();
    let hash = hex::encode(Sha256::digest(&archive));

    server
        .mock("GET", "/packages/Hello.json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{
                "name": "Hello",
                "uuid": "{UUID}",
                "versions": [
                    {{"version": "0.9.0", "content_hash": "{hash}"}},
                    {{"version": "1.0.0", "content_hash": "{hash}"}},
                    {{"version": "1.1.0", "content_hash": "{hash}", "yanked": true}}
                ]
            }}"#
        ))
        .create();
    server
        .mock("GET", "/packages/Nope.json")
        .with_status(404)
        .create();
    server
        .mock("GET", format!("/sources/{UUID}/{hash}.tar.gz").as_str())
        .with_status(200)
        .with_body(archive)
        .create();
}

fn pkgapp(depot: &Path) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("pkgapp"));
    cmd.arg("--depot")
        .arg(depot)
        .env_remove("PKGAPP_BIN_DIR")
        .env_remove("PKGAPP_REGISTRY")
        .env_remove("PKGAPP_REGISTRY_TOKEN")
        .env_remove("PKGAPP_RUNTIME");
    cmd
}

#[cfg(unix)]
#[test]
fn test_end_to_end_add_status_rm() {
    let mut server = Server::new();
    serve_registry(&mut server);
    let registry = format!("General={}", server.url());

    let dir = tempdir().unwrap();
    let depot = dir.path().join("depot");

    pkgapp(&depot)
        .args(["--registry", &registry, "add", "Hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Installed Hello 1.0.0"));

    let env = depot.join("apps/envs").join(format!("Hello-{UUID}"));
    assert!(env.join("Project.toml").exists());
    assert!(env.join("src/Hello.jl").exists());

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(depot.join("apps/manifest.json")).unwrap())
            .unwrap();
    let entry = &manifest["packages"][UUID];
    assert_eq!(entry["identity"]["name"], "Hello");
    assert_eq!(entry["source"]["kind"], "registry");
    assert_eq!(entry["source"]["version"], "1.0.0");

    let shim = fs::read_to_string(depot.join("bin/hello-admin")).unwrap();
    assert!(shim.contains("generated by pkgapp"));
    assert!(shim.contains(&*env.to_string_lossy()));
    assert!(shim.contains("'--threads=2' -m 'Hello.Admin' \"$@\""));
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(depot.join("bin/hello")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    // Adding again keeps a single entry
    pkgapp(&depot)
        .args(["--registry", &registry, "add", "Hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Reinstalled Hello 1.0.0"));

    pkgapp(&depot)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Hello [{UUID}] 1.0.0")))
        .stdout(predicate::str::contains("app: hello\n"))
        .stdout(predicate::str::contains("app: hello-admin\n"));

    pkgapp(&depot)
        .args(["rm", "hello-admin"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed app hello-admin of Hello"));
    assert!(!depot.join("bin/hello-admin").exists());
    assert!(env.exists());

    pkgapp(&depot)
        .args(["rm", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no apps left"));
    assert!(!depot.join("bin/hello").exists());
    assert!(!env.exists());

    pkgapp(&depot)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No apps installed."));
}

#[test]
fn test_add_unknown_package_reports_stage() {
    let mut server = Server::new();
    serve_registry(&mut server);
    let registry = format!("General={}", server.url());

    let dir = tempdir().unwrap();
    let depot = dir.path().join("depot");

    pkgapp(&depot)
        .args(["--registry", &registry, "add", "Nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed while resolving package version"))
        .stderr(predicate::str::contains("Nope"));

    assert!(!depot.join("apps/manifest.json").exists());
}

#[test]
fn test_add_yanked_exact_version_fails() {
    let mut server = Server::new();
    serve_registry(&mut server);
    let registry = format!("General={}", server.url());

    let dir = tempdir().unwrap();
    let depot = dir.path().join("depot");

    pkgapp(&depot)
        .args(["--registry", &registry, "add", "Hello@1.1.0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no eligible version"));
}

#[test]
fn test_add_without_registry_fails() {
    let dir = tempdir().unwrap();

    pkgapp(&dir.path().join("depot"))
        .args(["add", "Hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No registries configured"));
}

#[cfg(unix)]
#[test]
fn test_add_archive_url() {
    let mut server = Server::new();
    server
        .mock("GET", "/dl/Hello.tar.gz")
        .with_status(200)
        .with_body(source_archive())
        .create();

    let dir = tempdir().unwrap();
    let depot = dir.path().join("depot");

    pkgapp(&depot)
        .args(["add", &format!("{}/dl/Hello.tar.gz", server.url())])
        .assert()
        .success()
        .stdout(predicate::str::contains("Installed Hello sha256:"));

    assert!(depot.join("bin/hello").exists());
    pkgapp(&depot)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("/dl/Hello.tar.gz"));
}

#[cfg(unix)]
#[test]
fn test_develop_and_remove_keeps_checkout() {
    let dir = tempdir().unwrap();
    let depot = dir.path().join("depot");
    let checkout = dir.path().join("Hello");
    fs::create_dir_all(&checkout).unwrap();
    fs::write(checkout.join("Project.toml"), PROJECT).unwrap();

    pkgapp(&depot)
        .arg("develop")
        .arg(&checkout)
        .assert()
        .success()
        .stdout(predicate::str::contains("Installed Hello dev"));

    pkgapp(&depot)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("dev (dev)"));

    pkgapp(&depot).args(["rm", "Hello"]).assert().success();

    assert!(checkout.join("Project.toml").exists());
    assert!(!depot.join("bin/hello").exists());
}

#[test]
fn test_develop_missing_project_fails() {
    let dir = tempdir().unwrap();

    pkgapp(&dir.path().join("depot"))
        .arg("develop")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("project file not found"));
}

#[test]
fn test_rm_unknown_fails() {
    let dir = tempdir().unwrap();

    pkgapp(&dir.path().join("depot"))
        .args(["rm", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("`ghost` is neither"));
}

#[cfg(unix)]
#[test]
fn test_path_updates_startup_file_once() {
    let dir = tempdir().unwrap();
    let home = dir.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let depot = dir.path().join("depot");

    pkgapp(&depot)
        .arg("path")
        .env("HOME", &home)
        .env("SHELL", "/bin/bash")
        .assert()
        .success()
        .stdout(predicate::str::contains("Added"));

    pkgapp(&depot)
        .arg("path")
        .env("HOME", &home)
        .env("SHELL", "/bin/bash")
        .assert()
        .success()
        .stdout(predicate::str::contains("already on PATH"));

    let rc = fs::read_to_string(home.join(".bashrc")).unwrap();
    assert_eq!(rc.matches("# >>> pkgapp >>>").count(), 1);
    assert!(rc.contains(&*depot.join("bin").to_string_lossy()));
}
