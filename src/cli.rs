use clap::{Parser, Subcommand};
use std::path::PathBuf;

fn get_version() -> &'static str {
    const BASE_VERSION: &str = env!("CARGO_PKG_VERSION");

    // If there's a git tag at HEAD, use just the tag (release build)
    if let Some(tag) = option_env!("UPKEEP_GIT_TAG") {
        return tag;
    }

    // Not on a tag - include commit hash and branch (dev build)
    let commit = option_env!("UPKEEP_GIT_COMMIT").unwrap_or("unknown");
    let branch = option_env!("UPKEEP_GIT_BRANCH").unwrap_or("unknown");

    // Return a static string by leaking the formatted string
    // This is safe because it only happens once at startup
    let version = format!("v{}-{} ({})", BASE_VERSION, commit, branch);
    Box::leak(version.into_boxed_str())
}

/// Version tag the running binary was built from, or "dev" when built
/// outside a release. Release tags are compared against this to decide
/// whether an update applies.
pub fn build_version() -> &'static str {
    option_env!("UPKEEP_GIT_TAG").unwrap_or("dev")
}

#[derive(Parser)]
#[command(name = "upkeep")]
#[command(about = "A self-updating CLI for GitHub Releases")]
#[command(version = get_version(), propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (use multiple times for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Reduce output to errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check for a newer release now and install it
    Update,

    /// Copy this binary to a new location
    Install {
        /// Target file, or directory to install into
        destination: PathBuf,
    },

    /// Manage upkeep's configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show the current version
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show or change automatic update checking
    Autoupdate {
        /// New setting; omit to show the current one
        value: Option<bool>,
    },
}
