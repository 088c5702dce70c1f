#![deny(clippy::mod_module_files)]
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use git_pack_store::PackStoreConfig;

mod commands;

/// Unpack git packfiles into a loose-object store and build packs from it.
#[derive(Parser)]
#[command(name = "git-pack-store")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Object store directory (overrides config and GIT_PACK_STORE_DIR)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the object store and, if missing, the config file.
    Init(commands::init::InitArgs),
    /// Decode a pack and write every object into the store.
    Unpack(commands::unpack::UnpackArgs),
    /// Build a pack from objects in the store.
    Pack(commands::pack::PackArgs),
    /// Decode a pack, checking every object, without storing anything.
    Verify(commands::verify::VerifyArgs),
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries packs and reports.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = PackStoreConfig::load()?;
    if let Some(store) = cli.store {
        config.store_dir = store;
    }
    tracing::debug!(?config, "effective configuration");

    match cli.command {
        Command::Init(args) => commands::init::handle(&config, args),
        Command::Unpack(args) => commands::unpack::handle(&config, args),
        Command::Pack(args) => commands::pack::handle(&config, args),
        Command::Verify(args) => commands::verify::handle(&config, args),
    }
}
