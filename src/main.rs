mod commands;

use brewdeck::config::parse_env_overlay;
use brewdeck::{ChannelSink, Config, OutdatedMode, PackageManager};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "brewdeck")]
#[command(author, version, about = "A cache-aware, streaming front end for the Homebrew CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the brew executable (detected from the Homebrew prefix by default)
    #[arg(long, global = true, value_name = "PATH")]
    brew_path: Option<PathBuf>,

    /// Extra environment for brew, repeatable
    #[arg(long = "env", global = true, value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// How outdated casks that update themselves are reported
    #[arg(long, global = true, value_enum)]
    outdated_mode: Option<OutdatedMode>,

    /// Additional flags for `brew outdated`
    #[arg(long, global = true, allow_hyphen_values = true)]
    outdated_flags: Option<String>,

    /// Package whose upgrade replaces this application
    #[arg(long, global = true)]
    self_package: Option<String>,

    /// Print JSON instead of text where supported
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load installed, outdated, leaf packages and taps at once
    Snapshot {
        /// Refresh the package database first
        #[arg(long)]
        refresh: bool,
    },

    /// Install formulae or casks
    Install {
        /// Package names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Uninstall formulae or casks
    Uninstall {
        /// Package names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Upgrade a single package
    Upgrade {
        /// Package name
        name: String,

        /// Overwrite existing application bundles
        #[arg(long)]
        force: bool,
    },

    /// Upgrade several packages in one brew invocation
    UpgradeSelected {
        /// Package names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Upgrade every outdated package
    UpgradeAll,

    /// Add a tap (third-party repository)
    Tap {
        /// Tap name (user/repo format, or empty to list all taps)
        name: Option<String>,
    },

    /// Remove a tap
    Untap {
        /// Tap name (user/repo format)
        name: String,
    },

    /// Refresh the package database
    Update,

    /// Show information about formulae or casks
    Info {
        /// Package names
        #[arg(required = true)]
        names: Vec<String>,

        /// Treat the names as casks
        #[arg(long)]
        cask: bool,
    },

    /// Show installed dependencies of a formula
    Deps {
        /// Formula name
        name: String,
    },

    /// Check the installation for problems
    Doctor,

    /// Remove old versions and stale downloads
    Cleanup {
        /// Only report what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Write a Brewfile of the current installation
    Export {
        /// Destination file
        #[arg(default_value = "Brewfile")]
        path: PathBuf,
    },

    /// Refresh the database and list newly added formulae and casks
    New,

    /// Check that brew is installed and working
    Validate,
}

fn build_config(cli: &Cli) -> Config {
    let mut config = match &cli.brew_path {
        Some(path) => Config::with_brew_path(path),
        None => Config::detect(),
    };
    config.merge_env(parse_env_overlay(&cli.env));
    if let Some(mode) = cli.outdated_mode {
        config.outdated_mode = mode;
    }
    if let Some(flags) = &cli.outdated_flags {
        config.outdated_flags = flags.clone();
    }
    if let Some(package) = &cli.self_package {
        config.self_package = package.clone();
    }
    config
}

async fn run(pm: &PackageManager, command: Commands, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Snapshot { refresh } => commands::snapshot(pm, refresh, json).await,
        Commands::Install { names } => commands::install(pm, &names).await,
        Commands::Uninstall { names } => commands::uninstall(pm, &names).await,
        Commands::Upgrade { name, force } => commands::upgrade(pm, &name, force).await,
        Commands::UpgradeSelected { names } => commands::upgrade_selected(pm, &names).await,
        Commands::UpgradeAll => commands::upgrade_all(pm).await,
        Commands::Tap { name } => commands::tap(pm, name.as_deref()).await,
        Commands::Untap { name } => commands::untap(pm, &name).await,
        Commands::Update => commands::update(pm).await,
        Commands::Info { names, cask } => commands::info(pm, &names, cask, json).await,
        Commands::Deps { name } => commands::deps(pm, &name).await,
        Commands::Doctor => commands::doctor(pm).await,
        Commands::Cleanup { dry_run } => commands::cleanup(pm, dry_run).await,
        Commands::Export { path } => commands::export(pm, &path).await,
        Commands::New => commands::new_entities(pm, json).await,
        Commands::Validate => commands::validate(pm).await,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose { "brewdeck=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(command) = cli.command.take() else {
        println!(
            "{} brewdeck - a cache-aware front end for Homebrew",
            "🍺".bold()
        );
        println!("\nRun {} to see available commands.", "brewdeck --help".cyan());
        return Ok(());
    };

    let config = build_config(&cli);
    let (sink, events) = ChannelSink::new();
    let printer = commands::utils::spawn_printer(events);
    let pm = PackageManager::new(config, Arc::new(sink));

    let result = run(&pm, command, cli.json).await;

    // Dropping the manager closes the event channel and lets the printer drain.
    drop(pm);
    printer.await?;
    result
}
