pub mod init;
pub mod pack;
pub mod unpack;
pub mod verify;

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

/// Open `path`, or stdin when it is absent or `-`.
pub(crate) fn open_input(path: Option<&Path>) -> Result<Box<dyn Read>> {
    match path {
        Some(path) if path != Path::new("-") => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open pack file: {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => Ok(Box::new(io::stdin().lock())),
    }
}

/// Progress bar on stderr; hidden when stderr is not a terminal.
pub(crate) fn progress_bar(len: u64, message: &'static str) -> Result<ProgressBar> {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("  {msg} [{bar:40.cyan/blue}] {pos}/{len} objects ({eta})")
            .context("Failed to create progress template")?
            .progress_chars("█▓░"),
    );
    bar.set_message(message);
    Ok(bar)
}
