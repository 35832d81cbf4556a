use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// updeploy - unattended firmware, driver and software update deployment
#[derive(Parser, Debug)]
#[command(name = "updeploy")]
#[command(about = "Evaluate, download and install vendor update packages")]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults are used when it does not exist)
    #[arg(short, long, global = true, default_value = "updeploy.json")]
    pub config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print applicability and install state for each package
    Evaluate {
        /// Package list (JSON array of packages)
        #[arg(short, long)]
        packages: PathBuf,
        /// Local facts snapshot (JSON object of key to values)
        #[arg(short, long)]
        facts: PathBuf,
        /// Reuse or store the resolution under this cache tag
        #[arg(long)]
        cache_tag: Option<String>,
    },
    /// Fetch payloads for packages
    Download {
        #[arg(short, long)]
        packages: PathBuf,
        /// Re-download even when a valid payload exists
        #[arg(long)]
        force: bool,
    },
    /// Resolve, download and install every package that needs action
    Install {
        #[arg(short, long)]
        packages: PathBuf,
        #[arg(short, long)]
        facts: PathBuf,
        #[arg(long)]
        cache_tag: Option<String>,
    },
    /// Print the install history ledger
    History {
        /// Only this package ID
        #[arg(long)]
        id: Option<String>,
    },
    /// Manage cached resolutions
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },
    /// Validate the configuration file
    Validate,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Drop a cached resolution
    Delete {
        tag: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
