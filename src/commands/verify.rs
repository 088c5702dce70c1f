use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use gix_object::Kind;
use git_pack_store::pack::{Decoder, ResolveStats};
use git_pack_store::storage::FilesystemStorage;
use git_pack_store::PackStoreConfig;
use serde::Serialize;

use super::{open_input, progress_bar};

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Pack file to read; stdin when omitted
    pub pack: Option<PathBuf>,

    /// Resolve REF deltas against objects already in the store
    #[arg(long)]
    pub thin: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Default, Serialize)]
struct VerifyReport {
    checksum: String,
    objects: u64,
    commits: u64,
    trees: u64,
    blobs: u64,
    tags: u64,
    rematerializations: u64,
    external_bases: u64,
    peak_depth: usize,
    peak_cache_entries: usize,
    peak_cache_bytes: u64,
}

impl VerifyReport {
    fn count(&mut self, kind: Kind) {
        self.objects += 1;
        match kind {
            Kind::Commit => self.commits += 1,
            Kind::Tree => self.trees += 1,
            Kind::Blob => self.blobs += 1,
            Kind::Tag => self.tags += 1,
        }
    }

    fn record(&mut self, stats: ResolveStats) {
        self.rematerializations = stats.rematerializations;
        self.external_bases = stats.external_bases;
        self.peak_depth = stats.peak_depth;
        self.peak_cache_entries = stats.cache.peak_entries;
        self.peak_cache_bytes = stats.cache.peak_bytes;
    }
}

/// Handle the verify command
/// Resolves every object, failing on the first integrity error
pub fn handle(config: &PackStoreConfig, args: VerifyArgs) -> Result<()> {
    let storage = FilesystemStorage::new(&config.store_dir);
    let input = open_input(args.pack.as_deref())?;
    let mut decoder = Decoder::new(input, config.decode_options());
    if args.thin || config.thin_packs {
        decoder = decoder.with_external_bases(&storage);
    }

    let mut report = VerifyReport::default();
    let bar = progress_bar(0, "Verifying")?;
    while let Some(object) = decoder.next() {
        let object = object.context("Pack failed verification")?;
        if report.objects == 0 {
            bar.set_length(u64::from(decoder.entries()));
        }
        report.count(object.kind);
        bar.inc(1);
    }
    bar.finish_and_clear();

    report.checksum = decoder
        .checksum()
        .context("Pack ended without a verified trailer")?
        .to_hex();
    report.record(decoder.stats());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}: ok", report.checksum);
        println!(
            "  {} objects ({} commits, {} trees, {} blobs, {} tags)",
            report.objects, report.commits, report.trees, report.blobs, report.tags
        );
        println!(
            "  {} bases rebuilt, {} external, peak cache {} entries",
            report.rematerializations, report.external_bases, report.peak_cache_entries
        );
    }
    Ok(())
}
