//! Raw pack emission.
//!
//! Every byte goes through [`HashingWriter`], so the trailer is the SHA-1
//! of the stream as written and nothing is buffered beyond one entry header.

use std::io::{self, Read, Write};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};

use super::varint::{encode_entry_header, encode_offset};
use super::{EntryKind, Result, SIGNATURE, VERSION};
use crate::error::PackError;
use crate::object::ObjectId;

/// Write tee that hashes and counts what passes through.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha1,
    offset: u64,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.offset += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub struct PackWriter<W: Write> {
    out: HashingWriter<W>,
    compression: Compression,
    declared: Option<u32>,
    written: u32,
}

impl<W: Write> PackWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            out: HashingWriter {
                inner,
                hasher: Sha1::new(),
                offset: 0,
            },
            compression: Compression::default(),
            declared: None,
            written: 0,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Bytes written so far, i.e. the offset of the next entry.
    pub fn offset(&self) -> u64 {
        self.out.offset
    }

    pub fn write_header(&mut self, count: u32) -> Result<()> {
        if self.declared.is_some() {
            return Err(PackError::MalformedHeader("header already written".to_string()));
        }
        let mut header = Vec::with_capacity(super::HEADER_LEN);
        header.extend_from_slice(SIGNATURE);
        header.extend_from_slice(&VERSION.to_be_bytes());
        header.extend_from_slice(&count.to_be_bytes());
        self.out.write_all(&header)?;
        self.declared = Some(count);
        Ok(())
    }

    /// Write one entry whose payload is already in memory. Returns the
    /// entry's offset.
    pub fn write_entry(&mut self, kind: EntryKind, payload: &[u8]) -> Result<u64> {
        let mut reader = payload;
        self.write_entry_from(kind, payload.len() as u64, &mut reader)
    }

    /// Write one entry, streaming exactly `size` payload bytes from `reader`
    /// into the deflater.
    pub fn write_entry_from(
        &mut self,
        kind: EntryKind,
        size: u64,
        reader: &mut dyn Read,
    ) -> Result<u64> {
        let offset = self.begin_entry(kind, size)?;

        let mut encoder = ZlibEncoder::new(&mut self.out, self.compression);
        let copied = io::copy(&mut Read::take(&mut *reader, size), &mut encoder)?;
        let mut extra = [0u8; 1];
        let overrun = reader.read(&mut extra)? != 0;
        encoder.finish()?;

        if copied != size || overrun {
            return Err(PackError::CorruptObject {
                offset,
                reason: if overrun {
                    format!("source yields more than the declared {size} bytes")
                } else {
                    format!("source yields {copied} bytes, declared {size}")
                },
            });
        }
        self.written += 1;
        Ok(offset)
    }

    fn begin_entry(&mut self, kind: EntryKind, size: u64) -> Result<u64> {
        let declared = self
            .declared
            .ok_or_else(|| PackError::MalformedHeader("entry written before header".to_string()))?;
        if self.written >= declared {
            return Err(PackError::MalformedHeader(format!(
                "more entries than the {declared} declared"
            )));
        }

        let offset = self.out.offset;
        let mut header = Vec::with_capacity(32);
        encode_entry_header(kind.object_type(), size, &mut header);
        match kind {
            EntryKind::Base(_) => {}
            EntryKind::OfsDelta { base_offset } => {
                if base_offset >= offset {
                    return Err(PackError::MalformedHeader(format!(
                        "delta base offset {base_offset} does not precede entry at {offset}"
                    )));
                }
                encode_offset(offset - base_offset, &mut header);
            }
            EntryKind::RefDelta { base_id } => header.extend_from_slice(base_id.as_bytes()),
        }
        self.out.write_all(&header)?;
        Ok(offset)
    }

    /// Append the trailer and hand back the sink with the pack checksum.
    pub fn finish(mut self) -> Result<(W, ObjectId)> {
        let declared = self.declared.unwrap_or(0);
        if self.declared.is_none() {
            self.write_header(0)?;
        }
        if self.written != declared {
            return Err(PackError::MalformedHeader(format!(
                "header declares {declared} entries, {} written",
                self.written
            )));
        }

        let checksum = ObjectId::from_digest(self.out.hasher.clone());
        self.out.inner.write_all(checksum.as_bytes())?;
        self.out.inner.flush()?;
        Ok((self.out.inner, checksum))
    }
}
