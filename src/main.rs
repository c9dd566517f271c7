mod cli;
mod config;
mod credentials;
mod download;
mod elevate;
mod install;
mod platform;
mod prompt;
mod release;
mod updater;
mod version;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, ConfigAction};
use config::ConfigDir;
use release::ReleaseResolver;
use updater::AutoUpdater;

/// Repository this binary updates itself from.
const GITHUB_REPO: &str = "morgaesis/upkeep";
/// Release assets live behind the GitHub API and need a credential.
const PRIVATE_RELEASES: bool = true;

fn main() -> Result<()> {
    // Elevated self-invocations bypass normal argument handling entirely.
    elevate::try_handle_elevated();
    run()
}

#[tokio::main]
async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli)?;

    let config = ConfigDir::resolve()?;
    let resolver = ReleaseResolver::new(GITHUB_REPO, PRIVATE_RELEASES);
    let mut updater = AutoUpdater::new(config, resolver, cli::build_version())?;

    match cli.command {
        Commands::Version => {
            updater.auto_update().await;
            println!("upkeep {}", cli::build_version());
            return Ok(());
        }

        Commands::Update => {
            updater.update().await?;
        }

        Commands::Install { destination } => {
            install::install_current_exe(&destination)?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Autoupdate { value } => match value {
                Some(value) => {
                    updater.set_auto_update(value)?;
                    tracing::info!(
                        "Automatic updates {}",
                        if value { "enabled" } else { "disabled" }
                    );
                }
                None => match updater.auto_update_enabled() {
                    Some(enabled) => println!("{}", enabled),
                    None => println!("unset"),
                },
            },
        },
    }

    Ok(())
}

fn setup_logging(cli: &Cli) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if cli.quiet {
        "error"
    } else if cli.verbose == 0 {
        "warn"
    } else if cli.verbose == 1 {
        "info"
    } else {
        "debug"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    Ok(())
}
