use anyhow::Result;
use clap::Parser;
use pkgapp::commands::{self, config::{Config, ConfigOptions}};
use std::path::PathBuf;

/// pkgapp - install command-line apps from language packages
///
/// Each package gets its own environment; every app it declares gets a small
/// launcher script in the bin directory.
///
/// If PKGAPP_REGISTRY_TOKEN is set, it is sent as a bearer token to the registries.
///
/// Examples:
///   pkgapp --registry General=https://pkg.example.com add Comonicon
///   pkgapp add Foo@1.2.3
///   pkgapp add https://github.com/owner/Foo.git#main
///   pkgapp develop ./Foo
///   pkgapp rm foo
#[derive(Parser, Debug)]
#[command(author, version = env!("PKGAPP_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Depot directory (defaults to ~/.pkgapp)
    #[arg(long, env = "PKGAPP_DEPOT", value_name = "PATH", global = true)]
    depot: Option<PathBuf>,

    /// Directory for app shims (defaults to <depot>/bin)
    #[arg(long = "bin-dir", env = "PKGAPP_BIN_DIR", value_name = "PATH", global = true)]
    bin_dir: Option<PathBuf>,

    /// Package registry as NAME=URL or URL; repeat or comma-separate for several
    #[arg(
        long = "registry",
        env = "PKGAPP_REGISTRY",
        value_name = "REGISTRY",
        value_delimiter = ',',
        global = true
    )]
    registries: Vec<String>,

    /// Language runtime executable the shims invoke
    #[arg(long, env = "PKGAPP_RUNTIME", value_name = "PROGRAM", global = true)]
    runtime: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install packages and expose their apps
    Add(AddArgs),

    /// Expose the apps of a local checkout without copying it
    Develop(DevelopArgs),

    /// Remove packages or single apps
    Rm(RmArgs),

    /// Show installed packages and their apps
    Status,

    /// Update every registry package to its latest version
    Update,

    /// Add the bin directory to PATH in your shell startup file
    Path,
}

#[derive(clap::Args, Debug)]
struct AddArgs {
    /// Name, Name@version, archive url, or git url with optional #rev
    #[arg(value_name = "SPEC", required = true)]
    specs: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct DevelopArgs {
    /// Directory containing Project.toml
    #[arg(value_name = "PATH")]
    path: PathBuf,
}

#[derive(clap::Args, Debug)]
struct RmArgs {
    /// Package or app names
    #[arg(value_name = "NAME", required = true)]
    names: Vec<String>,
}

impl Cli {
    fn config_options(&self) -> ConfigOptions {
        ConfigOptions {
            depot: self.depot.clone(),
            bin_dir: self.bin_dir.clone(),
            registries: self.registries.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let config = Config::new(pkgapp::runtime::RealRuntime, cli.config_options())?;

    match &cli.command {
        Commands::Add(args) => commands::add(&config, &args.specs).await?,
        Commands::Develop(args) => commands::develop(&config, &args.path).await?,
        Commands::Rm(args) => commands::rm(&config, &args.names)?,
        Commands::Status => commands::status(&config)?,
        Commands::Update => commands::update(&config).await?,
        Commands::Path => commands::path(&config)?,
    }
    Ok(())
}
