use anyhow::{Context, Result};
use clap::Args;
use git_pack_store::storage::FilesystemStorage;
use git_pack_store::PackStoreConfig;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Write the effective configuration even if a config file exists
    #[arg(long)]
    pub force_config: bool,
}

/// Handle the init command
/// Creates the store layout and writes a config file pointing at it
pub fn handle(config: &PackStoreConfig, args: InitArgs) -> Result<()> {
    let storage = FilesystemStorage::new(&config.store_dir);
    storage
        .initialize()
        .with_context(|| format!("Failed to initialize store at {:?}", config.store_dir))?;
    eprintln!("git-pack-store: initialized store at {}", config.store_dir.display());

    let config_path = PackStoreConfig::config_file_path()?;
    if args.force_config || !config_path.exists() {
        config.save(&config_path)?;
        eprintln!("git-pack-store: wrote config {}", config_path.display());
    } else {
        tracing::info!(path = %config_path.display(), "keeping existing config file");
    }
    Ok(())
}
