use anyhow::{Context, Result, bail};
use log::debug;
use std::path::Path;

use crate::{
    application::{
        InstallReport, InstallUseCase, RemoveAction, Removal, StatusAction, StatusReport,
        UpdateOutcome,
    },
    package::PackageSpec,
    runtime::Runtime,
    shell,
};

pub mod config;
pub mod paths;

use config::Config;

/// Install each spec in turn. Stops at the first failure.
#[tracing::instrument(skip(config))]
pub async fn add<R: Runtime>(config: &Config<R>, specs: &[String]) -> Result<()> {
    let use_case = InstallUseCase::new(config.ctx(), &config.resolver, &config.http_client);
    for spec in specs {
        let parsed: PackageSpec = spec.parse()?;
        let report = use_case
            .add(&parsed)
            .await
            .with_context(|| format!("Failed to add {}", parsed))?;
        print_install(&report);
    }
    Ok(())
}

#[tracing::instrument(skip(config))]
pub async fn develop<R: Runtime>(config: &Config<R>, path: &Path) -> Result<()> {
    let use_case = InstallUseCase::new(config.ctx(), &config.resolver, &config.http_client);
    let report = use_case
        .develop(path)
        .await
        .with_context(|| format!("Failed to develop {}", path.display()))?;
    print_install(&report);
    Ok(())
}

fn print_install(report: &InstallReport) {
    let entry = &report.entry;
    match &report.previous {
        Some(previous) if previous.version_or_revision() != entry.version_or_revision() => {
            println!(
                "Updated {} {} -> {}",
                entry.identity.name,
                previous.version_or_revision(),
                entry.version_or_revision()
            );
        }
        Some(_) => println!(
            "Reinstalled {} {}",
            entry.identity.name,
            entry.version_or_revision()
        ),
        None => println!(
            "Installed {} {}",
            entry.identity.name,
            entry.version_or_revision()
        ),
    }
    for shim in &report.shims {
        println!("  {}", shim.display());
    }
    for (owner, app) in &report.displaced {
        println!("  `{}` was previously provided by {}", app, owner.name);
    }
    for env in &report.removed_envs {
        println!("  deleted {}", env.display());
    }
}

/// Remove packages or apps. Every name is attempted; the first error is
/// returned after the rest have run.
#[tracing::instrument(skip(config))]
pub fn rm<R: Runtime>(config: &Config<R>, names: &[String]) -> Result<()> {
    let action = RemoveAction::new(config.ctx());
    let mut failures = 0;
    for name in names {
        match action.remove(name) {
            Ok(report) => {
                match &report.removal {
                    Removal::Package(entry) => println!(
                        "Removed {} {}",
                        entry.identity.name,
                        entry.version_or_revision()
                    ),
                    Removal::App {
                        identity,
                        app,
                        package,
                    } => {
                        println!("Removed app {} of {}", app, identity.name);
                        if package.is_some() {
                            println!("  {} has no apps left and was removed", identity.name);
                        }
                    }
                }
                if let Some(env) = &report.removed_env {
                    println!("  deleted {}", env.display());
                }
            }
            Err(e) => {
                eprintln!("Error: {:#}", e);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        bail!("{} of {} removal(s) failed", failures, names.len());
    }
    Ok(())
}

#[tracing::instrument(skip(config))]
pub fn status<R: Runtime>(config: &Config<R>) -> Result<()> {
    let report = StatusAction::new(config.ctx()).status()?;
    print!("{}", format_status(&report));
    Ok(())
}

fn format_status(report: &StatusReport) -> String {
    let mut out = String::new();
    if report.packages.is_empty() {
        out.push_str("No apps installed.\n");
    }
    for entry in &report.packages {
        let linked = if entry.is_linked() { " (dev)" } else { "" };
        out.push_str(&format!(
            "{} {}{}\n  source: {}\n  path: {}\n",
            entry.identity,
            entry.version_or_revision(),
            linked,
            entry.source,
            entry.path.display()
        ));
        for app in entry.apps.keys() {
            let missing = if report.missing_shims.contains(app) {
                " (shim missing)"
            } else {
                ""
            };
            out.push_str(&format!("  app: {}{}\n", app, missing));
        }
    }
    if !report.orphaned_shims.is_empty() {
        out.push_str("Orphaned shims:\n");
        for app in &report.orphaned_shims {
            out.push_str(&format!("  {}\n", app));
        }
    }
    out
}

/// Re-add every registry package at its latest version.
#[tracing::instrument(skip(config))]
pub async fn update<R: Runtime>(config: &Config<R>) -> Result<()> {
    let use_case = InstallUseCase::new(config.ctx(), &config.resolver, &config.http_client);
    let outcomes = use_case.update_all().await?;
    if outcomes.is_empty() {
        println!("No apps installed.");
        return Ok(());
    }

    let mut failed = 0;
    for outcome in &outcomes {
        match outcome {
            UpdateOutcome::Updated { name, from, to } => {
                println!("Updated {} {} -> {}", name, from, to)
            }
            UpdateOutcome::UpToDate { name, version } => {
                println!("{} {} is up to date", name, version)
            }
            UpdateOutcome::Skipped { name } => {
                println!("Skipped {} (not from a registry)", name)
            }
            UpdateOutcome::Failed { name, error } => {
                eprintln!("Failed to update {}: {}", name, error);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{} package(s) failed to update", failed);
    }
    Ok(())
}

/// Add the bin directory to PATH in the user's shell startup file.
#[tracing::instrument(skip(config))]
pub fn path<R: Runtime>(config: &Config<R>) -> Result<()> {
    let bin_dir = &config.paths.bin_dir;
    if shell::add_bindir_to_path(&config.runtime, bin_dir)? {
        println!(
            "Added {} to PATH. Restart your shell to pick it up.",
            bin_dir.display()
        );
    } else {
        debug!("Startup file already up to date");
        println!("{} is already on PATH.", bin_dir.display());
    }
    Ok(())
}
