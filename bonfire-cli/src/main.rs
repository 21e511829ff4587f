//! Bonfire CLI
//!
//! Usage:
//!   bonfire channels --user 1
//!   bonfire --seed seed.json --updates 3 users --channel 💣
//!   bonfire create --name 🔥 --private --owner 1

use anyhow::Result;
use bonfire_cli::{Args, load_store, run};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    info!("Bonfire starting...");
    let db = load_store(args.seed.as_deref())?;
    let stdout = std::io::stdout();
    run(&args, db, &mut stdout.lock()).await
}
