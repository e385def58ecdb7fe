//! User and group directory commands.
//!
//! These write straight to the configured SQLite store and are meant for
//! operators seeding a deployment, not for end users.

use super::serve::open_store;
use chrono::{Duration, Utc};
use clap::Args;
use parley_core::{Config, GroupId, GroupRole, UserId};
use parley_gateway::{SignedTokenVerifier, SystemClock};
use parley_store::MessageStore;
use std::sync::Arc;

/// User command arguments.
#[derive(Args)]
pub struct UserArgs {
    #[command(subcommand)]
    pub command: UserCommand,
}

#[derive(clap::Subcommand)]
pub enum UserCommand {
    /// Create a user and print its id
    Add {
        /// Display name
        name: String,
    },

    /// Issue a signed bearer token for an existing user
    Token {
        /// User id
        user_id: i64,

        /// Lifetime in seconds
        #[arg(long, default_value = "86400")]
        ttl_secs: i64,
    },
}

/// Group command arguments.
#[derive(Args)]
pub struct GroupArgs {
    #[command(subcommand)]
    pub command: GroupCommand,
}

#[derive(clap::Subcommand)]
pub enum GroupCommand {
    /// Create a group; the creator becomes its admin
    Create {
        /// Group name
        name: String,

        /// Creator's user id
        #[arg(long)]
        creator: i64,
    },

    /// Add a user to a group
    AddMember {
        /// Group id
        group_id: i64,

        /// User id
        user_id: i64,

        /// Grant the admin role
        #[arg(long)]
        admin: bool,
    },
}

/// Run a user command.
pub async fn run_user(args: UserArgs, config: Config) -> anyhow::Result<()> {
    let store = Arc::new(open_store(&config).await?);

    match args.command {
        UserCommand::Add { name } => {
            let identity = store.create_user(name.trim()).await?;
            println!("Created user {} ({})", identity.id, identity.name);
        }

        UserCommand::Token { user_id, ttl_secs } => {
            if ttl_secs <= 0 {
                anyhow::bail!("--ttl-secs must be positive");
            }
            let secret = config
                .auth
                .token_secret
                .clone()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| anyhow::anyhow!("auth.token_secret is not set"))?;

            let user_id = UserId::new(user_id);
            if store.find_user(user_id).await?.is_none() {
                anyhow::bail!("User {} does not exist", user_id);
            }

            let verifier = SignedTokenVerifier::new(secret, store.clone(), Arc::new(SystemClock));
            let token = verifier.sign(user_id, Utc::now() + Duration::seconds(ttl_secs))?;
            println!("{}", token);
        }
    }

    store.close().await;
    Ok(())
}

/// Run a group command.
pub async fn run_group(args: GroupArgs, config: Config) -> anyhow::Result<()> {
    let store = open_store(&config).await?;

    match args.command {
        GroupCommand::Create { name, creator } => {
            let group = store.create_group(name.trim(), UserId::new(creator)).await?;
            println!("Created group {} ({}), admin {}", group, name.trim(), creator);
        }

        GroupCommand::AddMember {
            group_id,
            user_id,
            admin,
        } => {
            let role = if admin {
                GroupRole::Admin
            } else {
                GroupRole::Member
            };
            store
                .add_group_member(GroupId::new(group_id), UserId::new(user_id), role)
                .await?;
            println!("Added user {} to group {} as {}", user_id, group_id, role.as_str());
        }
    }

    store.close().await;
    Ok(())
}
