use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use git_pack_store::pack::Decoder;
use git_pack_store::storage::{FilesystemStorage, ObjectSink};
use git_pack_store::PackStoreConfig;

use super::{open_input, progress_bar};

#[derive(Debug, Args)]
pub struct UnpackArgs {
    /// Pack file to read; stdin when omitted
    pub pack: Option<PathBuf>,

    /// Resolve REF deltas against objects already in the store
    #[arg(long)]
    pub thin: bool,
}

/// Handle the unpack command
/// Decodes the pack and writes each resolved object as a loose object
pub fn handle(config: &PackStoreConfig, args: UnpackArgs) -> Result<()> {
    let storage = FilesystemStorage::new(&config.store_dir).with_compression(config.compression());
    storage
        .initialize()
        .with_context(|| format!("Failed to initialize store at {:?}", config.store_dir))?;

    let input = open_input(args.pack.as_deref())?;
    let mut decoder = Decoder::new(input, config.decode_options());
    if args.thin || config.thin_packs {
        decoder = decoder.with_external_bases(&storage);
    }

    let bar = progress_bar(0, "Unpacking")?;
    let mut written = 0u64;
    while let Some(object) = decoder.next() {
        let object = object.context("Failed to decode pack")?;
        if written == 0 {
            bar.set_length(u64::from(decoder.entries()));
        }
        storage
            .write_object(&object.id, object.kind, &object.data)
            .with_context(|| format!("Failed to store object {}", object.id))?;
        written += 1;
        bar.inc(1);
    }
    bar.finish_and_clear();

    let checksum = decoder
        .checksum()
        .context("Pack ended without a verified trailer")?;
    let stats = decoder.stats();
    tracing::info!(
        rematerializations = stats.rematerializations,
        external_bases = stats.external_bases,
        peak_cache_entries = stats.cache.peak_entries,
        "resolution finished"
    );
    eprintln!("git-pack-store: unpacked {written} objects");
    println!("{checksum}");
    Ok(())
}
