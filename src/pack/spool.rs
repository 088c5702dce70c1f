//! Holding area for compressed entry bodies between scan and resolution.
//!
//! The scanner copies each entry's raw deflate stream here. Resolution
//! reads an entry back and inflates it again when it needs the payload, so
//! what stays resident between the two passes is the compressed pack, and
//! only up to the in-memory limit before it moves to a temporary file.

use std::io::{self, Read, Seek, SeekFrom, Write};

use flate2::{Decompress, FlushDecompress, Status};
use tempfile::SpooledTempFile;

use super::Result;
use crate::error::PackError;

/// Spooled bytes kept in memory before rolling over to disk.
pub const DEFAULT_SPOOL_MEMORY: usize = 8 * 1024 * 1024;
/// Upper bound on the capacity reserved from a declared size.
const MAX_SIZE_HINT: u64 = 16 * 1024 * 1024;
const INFLATE_CHUNK: usize = 64 * 1024;

/// Location of one entry's deflate stream inside the spool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub start: u64,
    pub len: u64,
}

pub struct Spool {
    file: SpooledTempFile,
    len: u64,
    decompress: Decompress,
    scratch: Vec<u8>,
}

impl Spool {
    pub fn new(memory_limit: usize) -> Self {
        Self {
            file: SpooledTempFile::new(memory_limit),
            len: 0,
            decompress: Decompress::new(false),
            scratch: Vec::new(),
        }
    }

    /// Bytes spooled so far.
    pub fn bytes(&self) -> u64 {
        self.len
    }

    /// Whether the spool has moved from memory to a temporary file.
    pub fn on_disk(&self) -> bool {
        self.file.is_rolled()
    }

    /// Start a new extent at the end of the spool.
    pub fn begin(&mut self) -> Result<u64> {
        self.file.seek(SeekFrom::End(0))?;
        Ok(self.len)
    }

    /// Close the extent opened by [`Spool::begin`].
    pub fn end(&self, start: u64) -> Extent {
        Extent {
            start,
            len: self.len - start,
        }
    }

    /// Inflate the deflate stream stored at `extent`. `size` is the
    /// declared payload size and only sizes the allocation; `offset` names
    /// the pack entry in errors.
    pub fn inflate(&mut self, extent: Extent, size: u64, offset: u64) -> Result<Vec<u8>> {
        self.scratch.clear();
        self.scratch.resize(extent.len as usize, 0);
        self.file.seek(SeekFrom::Start(extent.start))?;
        self.file.read_exact(&mut self.scratch)?;
        self.file.seek(SeekFrom::End(0))?;

        let mut out = Vec::with_capacity(size.min(MAX_SIZE_HINT) as usize);
        self.decompress.reset(false);
        let mut input = &self.scratch[..];
        loop {
            if out.capacity() - out.len() < INFLATE_CHUNK / 4 {
                out.reserve(INFLATE_CHUNK);
            }
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let status = self
                .decompress
                .decompress_vec(input, &mut out, FlushDecompress::None)
                .map_err(|e| PackError::Decompression {
                    offset,
                    reason: e.to_string(),
                })?;
            let consumed = (self.decompress.total_in() - before_in) as usize;
            let produced = self.decompress.total_out() - before_out;
            input = &input[consumed..];

            match status {
                Status::StreamEnd => return Ok(out),
                Status::Ok | Status::BufError if consumed == 0 && produced == 0 => {
                    return Err(PackError::Decompression {
                        offset,
                        reason: "spooled stream ended early".to_string(),
                    });
                }
                Status::Ok | Status::BufError => {}
            }
        }
    }
}

impl Write for Spool {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.len += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
