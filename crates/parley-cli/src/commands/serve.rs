//! Serve command.

use clap::Args;
use parley_core::config::BindMode;
use parley_core::{paths, Config};
use parley_gateway::{Clock, Gateway, SignedTokenVerifier, SystemClock};
use parley_store::{MemoryMessageStore, MessageStore, SqliteMessageStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Serve command arguments.
#[derive(Args)]
pub struct ServeArgs {
    /// Bind mode (loopback, lan)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Port number
    #[arg(short, long)]
    pub port: Option<u16>,

    /// SQLite database URL
    #[arg(long)]
    pub database_url: Option<String>,

    /// Keep everything in memory; nothing survives a restart
    #[arg(long)]
    pub ephemeral: bool,
}

pub(crate) fn parse_bind(bind: &str) -> anyhow::Result<BindMode> {
    match bind {
        "loopback" => Ok(BindMode::Loopback),
        "lan" => Ok(BindMode::Lan),
        other => anyhow::bail!("Invalid bind mode: {}. Valid options: loopback, lan", other),
    }
}

/// Open the configured durable store.
pub(crate) async fn open_store(config: &Config) -> anyhow::Result<SqliteMessageStore> {
    if config.store.database_url.is_none() {
        paths::ensure_dirs()?;
    }
    let url = config.store.resolved_url()?;
    Ok(SqliteMessageStore::connect(&url, config.store.max_connections).await?)
}

/// Run the serve command.
pub async fn run(args: ServeArgs, mut config: Config) -> anyhow::Result<()> {
    if let Some(bind) = args.bind {
        config.gateway.bind = parse_bind(&bind)?;
    }
    if let Some(port) = args.port {
        config.gateway.port = port;
    }
    if let Some(url) = args.database_url {
        config.store.database_url = Some(url);
    }
    config.validate()?;

    let secret = config
        .auth
        .token_secret
        .clone()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "auth.token_secret is not set. Set it in the config file or via PARLEY_TOKEN_SECRET."
            )
        })?;

    let store: Arc<dyn MessageStore> = if args.ephemeral {
        warn!("Running with an in-memory store; messages will not survive a restart");
        Arc::new(MemoryMessageStore::new())
    } else {
        Arc::new(open_store(&config).await?)
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let verifier = Arc::new(SignedTokenVerifier::new(secret, store.clone(), clock.clone()));

    info!(
        bind = ?config.gateway.bind,
        port = config.gateway.port,
        "Starting gateway"
    );
    let gateway = Gateway::with_clock(config, store, verifier, clock);
    gateway.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bind() {
        assert_eq!(parse_bind("loopback").unwrap(), BindMode::Loopback);
        assert_eq!(parse_bind("lan").unwrap(), BindMode::Lan);
        assert!(parse_bind("tailnet").is_err());
    }

    #[tokio::test]
    async fn test_serve_requires_token_secret() {
        let args = ServeArgs {
            bind: None,
            port: Some(0),
            database_url: None,
            ephemeral: true,
        };
        // Port 0 fails validation before anything binds.
        assert!(run(args, Config::default()).await.is_err());

        let args = ServeArgs {
            bind: None,
            port: None,
            database_url: None,
            ephemeral: true,
        };
        let err = run(args, Config::default()).await.unwrap_err();
        assert!(err.to_string().contains("token_secret"));
    }

    #[tokio::test]
    async fn test_open_store_with_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store.database_url = Some(format!(
            "sqlite://{}",
            dir.path().join("parley.db").display()
        ));

        let store = open_store(&config).await.unwrap();
        let user = store.create_user("alice").await.unwrap();
        assert_eq!(store.find_user(user.id).await.unwrap(), Some(user));
        store.close().await;
    }
}
