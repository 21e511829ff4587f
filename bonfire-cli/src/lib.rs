//! Command-line front end for Bonfire.
//!
//! Loads a seed into the in-memory store, opens one aggregate session and
//! prints each emission as a JSON line.

use anyhow::{Context, Result};
use bonfire_store::{MemoryDatabase, Seed};
use bonfire_sync::{ChannelsService, SyncResult, UsersService};
use bonfire_types::{Channel, ChannelName, User, UserId};
use clap::{Parser, Subcommand};
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "bonfire")]
#[command(about = "Query live Bonfire channel and user aggregates")]
pub struct Args {
    /// JSON seed file for the in-memory store. Uses a small demo seed if omitted.
    #[arg(short, long)]
    pub seed: Option<PathBuf>,

    /// Number of live emissions to print before exiting
    #[arg(short, long, default_value = "1")]
    pub updates: usize,

    /// Stop waiting for the next emission after this many milliseconds
    #[arg(long, default_value = "250")]
    pub idle_ms: u64,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Channels visible to a user
    Channels {
        #[arg(long)]
        user: UserId,
    },
    /// Owners of a channel
    Users {
        #[arg(long)]
        channel: ChannelName,
    },
    /// Create a channel
    Create {
        /// A single emoji
        #[arg(long)]
        name: String,
        #[arg(long, requires = "owner")]
        private: bool,
        #[arg(long, requires = "private")]
        owner: Option<UserId>,
    },
    /// Every user in the store
    AllUsers,
}

/// Two users. 💣 is public and owned by both, 🙈 is private to user 1.
pub fn demo_seed() -> Seed {
    Seed {
        users: vec![User::new("1", "TestUser1"), User::new("2", "TestUser2")],
        channels: vec![Channel::public("💣"), Channel::private("🙈")],
        owners: BTreeMap::from([
            (ChannelName::from("💣"), vec![UserId::from("1"), UserId::from("2")]),
            (ChannelName::from("🙈"), vec![UserId::from("1")]),
        ]),
    }
}

/// Builds the store from `seed`, or from [`demo_seed`] if no path is given.
pub fn load_store(seed: Option<&Path>) -> Result<MemoryDatabase> {
    let seed = match seed {
        Some(path) => {
            info!("Loading seed from {:?}", path);
            Seed::load(path).with_context(|| format!("Failed to load seed {}", path.display()))?
        }
        None => demo_seed(),
    };
    Ok(MemoryDatabase::from_seed(seed))
}

/// Runs one command against `db`, writing JSON lines to `out`.
pub async fn run<W: Write>(args: &Args, db: MemoryDatabase, out: &mut W) -> Result<()> {
    let store = Arc::new(db.clone());
    let channels = ChannelsService::new(store.clone());
    let users = UsersService::new(store.clone(), store);
    let idle = Duration::from_millis(args.idle_ms);

    match &args.command {
        Command::Channels { user } => {
            let user = db.user(user).unwrap_or_else(|| {
                warn!("No record for user {}, querying by id only", user);
                User::new(user.clone(), user.as_str())
            });
            print_emissions(channels.channels_for(&user), args.updates, idle, out).await
        }
        Command::Users { channel } => {
            let channel = db
                .channel(channel)
                .with_context(|| format!("Unknown channel {channel}"))?;
            print_emissions(users.users_for(&channel), args.updates, idle, out).await
        }
        Command::Create {
            name,
            private,
            owner,
        } => {
            let created = match owner {
                Some(owner_id) if *private => {
                    let owner = db
                        .user(owner_id)
                        .with_context(|| format!("Unknown user {owner_id}"))?;
                    channels.create_private_channel(name, &owner).await?
                }
                _ => channels.create_public_channel(name).await?,
            };
            info!("Created channel {}", created.name);
            write_json(out, &created)
        }
        Command::AllUsers => print_emissions(users.all_users(), args.updates, idle, out).await,
    }
}

/// Prints up to `updates` emissions. Stops early if the stream ends or stays
/// quiet for `idle`.
async fn print_emissions<T, W>(
    mut stream: BoxStream<'static, SyncResult<T>>,
    updates: usize,
    idle: Duration,
    out: &mut W,
) -> Result<()>
where
    T: Serialize,
    W: Write,
{
    let mut printed = 0;
    while printed < updates {
        match tokio::time::timeout(idle, stream.next()).await {
            Ok(Some(item)) => {
                write_json(out, &item?)?;
                printed += 1;
            }
            Ok(None) => {
                debug!("Stream ended after {} emissions", printed);
                break;
            }
            Err(_) => {
                debug!("No emission within {:?}, stopping", idle);
                break;
            }
        }
    }
    Ok(())
}

fn write_json<T: Serialize, W: Write>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
