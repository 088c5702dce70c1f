use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use git_pack_store::pack::Encoder;
use git_pack_store::storage::FilesystemStorage;
use git_pack_store::{ObjectId, PackStoreConfig};

use super::progress_bar;

#[derive(Debug, Args)]
pub struct PackArgs {
    /// Object ids to pack, in order; read one per line from stdin when
    /// none are given
    pub ids: Vec<String>,

    /// Pack every object in the store
    #[arg(long, conflicts_with = "ids")]
    pub all: bool,

    /// Output file; stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Handle the pack command
/// Writes the requested objects as a pack of undeltified entries
pub fn handle(config: &PackStoreConfig, args: PackArgs) -> Result<()> {
    let storage = FilesystemStorage::new(&config.store_dir);

    let ids = if args.all {
        storage.list_ids().context("Failed to list stored objects")?
    } else if args.ids.is_empty() {
        parse_ids(io::stdin().lock().lines().collect::<io::Result<Vec<_>>>()?)?
    } else {
        parse_ids(args.ids)?
    };
    if ids.is_empty() {
        tracing::warn!("no objects requested, writing an empty pack");
    }

    let output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let mut output = BufWriter::new(output);

    let bar = progress_bar(ids.len() as u64, "Packing")?;
    let checksum = Encoder::new(&mut output, &storage)
        .with_compression(config.compression())
        .encode_with(&ids, |_, _| bar.inc(1))
        .context("Failed to encode pack")?;
    output.flush().context("Failed to flush pack output")?;
    bar.finish_and_clear();

    eprintln!("git-pack-store: packed {} objects, checksum {checksum}", ids.len());
    Ok(())
}

fn parse_ids<I, S>(lines: I) -> Result<Vec<ObjectId>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .filter(|line| !line.as_ref().trim().is_empty())
        .map(|line| {
            let line = line.as_ref().trim();
            line.parse::<ObjectId>()
                .with_context(|| format!("Invalid object id: {line:?}"))
        })
        .collect()
}
