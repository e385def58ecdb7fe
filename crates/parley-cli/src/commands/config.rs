//! Configuration management commands.

use clap::Args;
use parley_core::{Config, SecretString};
use std::path::PathBuf;

/// Config command arguments.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(clap::Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,

    /// Get a configuration value
    Get {
        /// Configuration key (dot-separated path)
        key: String,
    },

    /// Write a default configuration file
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Show configuration file path
    Path,

    /// Validate configuration
    Validate,
}

/// Effective configuration as JSON, with secrets masked.
fn redacted(config: &Config) -> anyhow::Result<serde_json::Value> {
    let mut config = config.clone();
    if config.auth.token_secret.is_some() {
        config.auth.token_secret = Some(SecretString::new("********"));
    }
    Ok(serde_json::to_value(&config)?)
}

fn lookup<'a>(json: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
    key.split('.').try_fold(json, |acc, k| acc.get(k))
}

/// Run the config command.
///
/// `effective` is the loaded configuration with environment overrides.
pub fn run(args: ConfigArgs, path: Option<PathBuf>, effective: Config) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    match args.command {
        ConfigCommand::Show => {
            println!("{}", serde_json::to_string_pretty(&redacted(&effective)?)?);
        }

        ConfigCommand::Get { key } => {
            let json = redacted(&effective)?;
            match lookup(&json, &key) {
                Some(v) => println!("{}", serde_json::to_string_pretty(v)?),
                None => anyhow::bail!("Key not found: {}", key),
            }
        }

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists: {:?}. Use --force to overwrite.",
                    path
                );
            }

            Config::default().save(&path)?;

            println!("Created config file: {:?}", path);
            println!("  Tip: set auth.token_secret (or PARLEY_TOKEN_SECRET) before 'parley serve'.");
        }

        ConfigCommand::Path => {
            println!("{}", path.display());
        }

        ConfigCommand::Validate => match Config::load(&path) {
            Ok(mut config) => {
                config.apply_env_overrides();
                match config.validate() {
                    Ok(_) => println!("Configuration is valid"),
                    Err(e) => anyhow::bail!("Configuration error: {}", e),
                }
            }
            Err(e) => anyhow::bail!("Failed to load config: {}", e),
        },
    }

    Ok(())
}
