//! Parley command-line interface.

pub mod commands;

use clap::{Parser, Subcommand};
use parley_core::Config;
use std::path::PathBuf;

/// Parley - real-time messaging gateway
#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to config file
    #[arg(short, long, env = "PARLEY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Load the config file (defaults if absent) with environment overrides.
    pub fn load_config(&self) -> anyhow::Result<Config> {
        Ok(Config::load_with_env(self.config.as_deref())?)
    }
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Serve(commands::serve::ServeArgs),

    /// Configuration management
    Config(commands::config::ConfigArgs),

    /// Manage users and issue tokens
    User(commands::directory::UserArgs),

    /// Manage groups
    Group(commands::directory::GroupArgs),

    /// Show version information
    Version,
}

/// Run the CLI with the given arguments.
pub async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve(args) => commands::serve::run(args, config).await,
        Commands::Config(args) => commands::config::run(args, cli.config, config),
        Commands::User(args) => commands::directory::run_user(args, config).await,
        Commands::Group(args) => commands::directory::run_group(args, config).await,
        Commands::Version => {
            println!("parley {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
