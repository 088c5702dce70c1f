//! Sequential pack stream reader.
//!
//! Entries can only be read in order: where an entry ends is decided by
//! where its zlib stream ends, not by the declared size. The scanner keeps
//! a running SHA-1 over every consumed byte for the trailer check and a
//! CRC32 over each entry's raw bytes.
//!
//! Payloads are inflated as raw deflate after a hand-checked zlib header.
//! The Adler-32 trailer is recorded rather than verified here, so payload
//! integrity is checked when the entry is resolved.

use std::io::{self, BufRead, BufReader, Read, Write};

use flate2::{Decompress, FlushDecompress, Status};
use sha1::{Digest, Sha1};

use super::varint::{decode_entry_header, decode_offset};
use super::{EntryKind, ObjectHeader, ObjectType, Result, HEADER_LEN, SIGNATURE, VERSION};
use crate::error::PackError;
use crate::object::{ObjectId, ID_LEN};

/// Output growth step while inflating.
const INFLATE_CHUNK: usize = 64 * 1024;
/// Upper bound on the capacity reserved from a declared size.
const MAX_SIZE_HINT: u64 = 16 * 1024 * 1024;

/// What the scanner learned about one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannedObject {
    /// Object id for flat entries; deltas get theirs at resolution.
    pub id: Option<ObjectId>,
    /// CRC32 over the entry's raw bytes, header included.
    pub crc32: u32,
    /// Adler-32 recorded in the zlib trailer.
    pub adler32: u32,
    /// Raw entry length in bytes, header included.
    pub length: u64,
}

/// `BufRead` adapter that hashes and counts exactly the bytes consumed.
struct Tracking<R> {
    inner: BufReader<R>,
    offset: u64,
    hasher: Sha1,
    crc: Option<crc32fast::Hasher>,
}

impl<R: Read> Read for Tracking<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = {
            let available = self.fill_buf()?;
            let n = available.len().min(buf.len());
            buf[..n].copy_from_slice(&available[..n]);
            n
        };
        self.consume(n);
        Ok(n)
    }
}

impl<R: Read> BufRead for Tracking<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        let consumed = &self.inner.buffer()[..amt];
        self.hasher.update(consumed);
        if let Some(crc) = self.crc.as_mut() {
            crc.update(consumed);
        }
        self.offset += amt as u64;
        self.inner.consume(amt);
    }
}

pub struct Scanner<R> {
    reader: Tracking<R>,
    decompress: Decompress,
}

impl<R: Read> Scanner<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Tracking {
                inner: BufReader::new(reader),
                offset: 0,
                hasher: Sha1::new(),
                crc: None,
            },
            decompress: Decompress::new(false),
        }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.reader.offset
    }

    /// Read the 12-byte pack header, returning version and object count.
    pub fn header(&mut self) -> Result<(u32, u32)> {
        let mut buf = [0u8; HEADER_LEN];
        self.read_exact(&mut buf)?;

        if &buf[0..4] != SIGNATURE {
            return Err(PackError::MalformedHeader(format!(
                "bad signature {:02x?}",
                &buf[0..4]
            )));
        }
        let version = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if version != VERSION {
            return Err(PackError::MalformedHeader(format!(
                "unsupported version {version}"
            )));
        }
        let count = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        Ok((version, count))
    }

    /// Read the next entry header and base reference.
    pub fn next_object_header(&mut self) -> Result<ObjectHeader> {
        let offset = self.reader.offset;
        self.reader.crc = Some(crc32fast::Hasher::new());

        let (code, size, _) =
            decode_entry_header(&mut self.reader).map_err(|e| truncated(e, offset))?;
        let object_type = ObjectType::from_code(code).ok_or_else(|| {
            PackError::MalformedHeader(format!("reserved type code {code} at offset {offset}"))
        })?;

        let kind = match object_type.kind() {
            Some(kind) => EntryKind::Base(kind),
            None if object_type == ObjectType::OfsDelta => {
                let (distance, _) =
                    decode_offset(&mut self.reader).map_err(|e| truncated(e, offset))?;
                if distance == 0 || distance > offset {
                    return Err(PackError::MalformedHeader(format!(
                        "delta base distance {distance} invalid at offset {offset}"
                    )));
                }
                EntryKind::OfsDelta {
                    base_offset: offset - distance,
                }
            }
            None => {
                let mut id = [0u8; ID_LEN];
                self.read_exact(&mut id)?;
                EntryKind::RefDelta {
                    base_id: ObjectId::from_bytes(id),
                }
            }
        };

        Ok(ObjectHeader {
            offset,
            kind,
            size,
            header_len: self.reader.offset - offset,
        })
    }

    /// Inflate the payload following `header` into `out`.
    ///
    /// The declared size only sizes the initial allocation; inflation runs
    /// to the natural end of the zlib stream.
    pub fn next_object(&mut self, header: &ObjectHeader, out: &mut Vec<u8>) -> Result<ScannedObject> {
        self.next_object_copying(header, out, &mut io::sink())
    }

    /// Like [`Scanner::next_object`], also copying the entry's raw deflate
    /// stream (zlib header and trailer excluded) into `deflate`.
    pub fn next_object_copying(
        &mut self,
        header: &ObjectHeader,
        out: &mut Vec<u8>,
        deflate: &mut dyn Write,
    ) -> Result<ScannedObject> {
        out.clear();
        out.reserve(header.size.min(MAX_SIZE_HINT) as usize);

        let mut zlib_header = [0u8; 2];
        self.read_exact(&mut zlib_header)?;
        check_zlib_header(zlib_header, header.offset)?;

        self.decompress.reset(false);
        loop {
            let offset = self.reader.offset;
            let input = self
                .reader
                .inner
                .fill_buf()
                .map_err(|e| truncated(e.into(), offset))?;
            if input.is_empty() {
                return Err(PackError::TruncatedStream { offset });
            }
            if out.capacity() - out.len() < INFLATE_CHUNK / 4 {
                out.reserve(INFLATE_CHUNK);
            }

            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let status = self
                .decompress
                .decompress_vec(input, out, FlushDecompress::None)
                .map_err(|e| PackError::Decompression {
                    offset: header.offset,
                    reason: e.to_string(),
                })?;
            let consumed = (self.decompress.total_in() - before_in) as usize;
            let produced = self.decompress.total_out() - before_out;
            deflate.write_all(&input[..consumed])?;
            self.reader.consume(consumed);

            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError if consumed == 0 && produced == 0 => {
                    return Err(PackError::Decompression {
                        offset: header.offset,
                        reason: "inflate made no progress".to_string(),
                    });
                }
                Status::Ok | Status::BufError => {}
            }
        }

        let mut trailer = [0u8; 4];
        self.read_exact(&mut trailer)?;
        let adler32 = u32::from_be_bytes(trailer);

        let crc32 = self
            .reader
            .crc
            .take()
            .map(crc32fast::Hasher::finalize)
            .unwrap_or_default();

        let id = match header.kind {
            EntryKind::Base(kind) => Some(ObjectId::compute(kind, out)),
            EntryKind::OfsDelta { .. } | EntryKind::RefDelta { .. } => None,
        };

        tracing::trace!(
            offset = header.offset,
            kind = %header.kind.object_type(),
            size = out.len(),
            "scanned entry"
        );

        Ok(ScannedObject {
            id,
            crc32,
            adler32,
            length: self.reader.offset - header.offset,
        })
    }

    /// Read the trailer and compare it with the SHA-1 of everything before.
    pub fn checksum(&mut self) -> Result<ObjectId> {
        let actual = ObjectId::from_digest(self.reader.hasher.clone());

        let mut trailer = [0u8; ID_LEN];
        self.read_exact(&mut trailer)?;
        let expected = ObjectId::from_bytes(trailer);

        if expected != actual {
            return Err(PackError::ChecksumMismatch { expected, actual });
        }
        Ok(actual)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let offset = self.reader.offset;
        self.reader
            .read_exact(buf)
            .map_err(|e| truncated(e.into(), offset))
    }
}

/// Map an unexpected EOF to `TruncatedStream`.
fn truncated(err: PackError, offset: u64) -> PackError {
    match err {
        PackError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            PackError::TruncatedStream { offset }
        }
        other => other,
    }
}

fn check_zlib_header([cmf, flg]: [u8; 2], offset: u64) -> Result<()> {
    let method_ok = cmf & 0x0f == 8 && cmf >> 4 <= 7;
    let check_ok = (u16::from(cmf) << 8 | u16::from(flg)) % 31 == 0;
    let no_dict = flg & 0x20 == 0;
    if method_ok && check_ok && no_dict {
        Ok(())
    } else {
        Err(PackError::Decompression {
            offset,
            reason: format!("invalid zlib header {cmf:02x} {flg:02x}"),
        })
    }
}

/// Adler-32 as used by the zlib trailer.
pub(crate) fn adler32(data: &[u8]) -> u32 {
    const MOD: u32 = 65_521;
    // Largest run that cannot overflow `b` before reduction.
    const NMAX: usize = 5_552;

    let (mut a, mut b) = (1u32, 0u32);
    for chunk in data.chunks(NMAX) {
        for &byte in chunk {
            a += u32::from(byte);
            b += a;
        }
        a %= MOD;
        b %= MOD;
    }
    (b << 16) | a
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use gix_object::Kind;

    use super::*;
    use crate::pack::testutil::{build_pack, reseal, Entry};

    #[test]
    fn test_adler32_known_value() {
        assert_eq!(adler32(b"Wikipedia"), 0x11e6_0398);
        assert_eq!(adler32(b""), 1);
    }

    #[test]
    fn test_adler32_matches_zlib_trailer() {
        let data = vec![0xabu8; 20_000];
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data).unwrap();
        let compressed = encoder.finish().unwrap();
        let trailer = &compressed[compressed.len() - 4..];
        assert_eq!(
            adler32(&data),
            u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]])
        );
    }

    #[test]
    fn test_scan_entries() {
        let (pack, offsets) = build_pack(&[
            Entry::Flat(Kind::Blob, b"hello world".to_vec()),
            Entry::Flat(Kind::Commit, vec![b'c'; 1000]),
        ]);

        let mut scanner = Scanner::new(&pack[..]);
        assert_eq!(scanner.header().unwrap(), (2, 2));

        let mut out = Vec::new();
        let first = scanner.next_object_header().unwrap();
        assert_eq!(first.offset, offsets[0]);
        assert_eq!(first.kind, EntryKind::Base(Kind::Blob));
        assert_eq!(first.size, 11);
        let scanned = scanner.next_object(&first, &mut out).unwrap();
        assert_eq!(out, b"hello world");
        assert_eq!(scanned.id, Some(ObjectId::compute(Kind::Blob, b"hello world")));
        assert_eq!(scanned.adler32, adler32(b"hello world"));
        assert_eq!(first.offset + scanned.length, offsets[1]);

        let crc = crc32fast::hash(&pack[offsets[0] as usize..offsets[1] as usize]);
        assert_eq!(scanned.crc32, crc);

        let second = scanner.next_object_header().unwrap();
        assert_eq!(second.offset, offsets[1]);
        scanner.next_object(&second, &mut out).unwrap();
        assert_eq!(out.len(), 1000);

        let checksum = scanner.checksum().unwrap();
        assert_eq!(checksum.as_bytes(), &pack[pack.len() - 20..]);
    }

    #[test]
    fn test_bad_signature() {
        let mut pack = build_pack(&[]).0;
        pack[0] = b'K';
        let err = Scanner::new(&pack[..]).header().unwrap_err();
        assert!(matches!(err, PackError::MalformedHeader(_)));
    }

    #[test]
    fn test_bad_version() {
        let mut pack = build_pack(&[]).0;
        pack[7] = 3;
        let err = Scanner::new(&pack[..]).header().unwrap_err();
        assert!(matches!(err, PackError::MalformedHeader(_)));
    }

    #[test]
    fn test_truncated_header() {
        let err = Scanner::new(&b"PACK\0\0"[..]).header().unwrap_err();
        assert!(matches!(err, PackError::TruncatedStream { offset: 0 }));
    }

    #[test]
    fn test_truncated_payload() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
        let (pack, _) = build_pack(&[Entry::Flat(Kind::Blob, data)]);
        let cut = &pack[..pack.len() - 30];

        let mut scanner = Scanner::new(cut);
        scanner.header().unwrap();
        let header = scanner.next_object_header().unwrap();
        let err = scanner.next_object(&header, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, PackError::TruncatedStream { .. }));
    }

    #[test]
    fn test_corrupt_deflate() {
        let (mut pack, offsets) = build_pack(&[Entry::Flat(Kind::Blob, b"some payload".to_vec())]);
        // Damage the zlib header check bits.
        let zlib_start = offsets[0] as usize + 1;
        pack[zlib_start + 1] ^= 0x01;

        let mut scanner = Scanner::new(&pack[..]);
        scanner.header().unwrap();
        let header = scanner.next_object_header().unwrap();
        let err = scanner.next_object(&header, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, PackError::Decompression { .. }));
    }

    #[test]
    fn test_checksum_mismatch() {
        let (mut pack, _) = build_pack(&[Entry::Flat(Kind::Blob, b"x".to_vec())]);
        let last = pack.len() - 1;
        pack[last] ^= 0xff;

        let mut scanner = Scanner::new(&pack[..]);
        scanner.header().unwrap();
        let header = scanner.next_object_header().unwrap();
        scanner.next_object(&header, &mut Vec::new()).unwrap();
        assert!(matches!(
            scanner.checksum(),
            Err(PackError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_reserved_type_code() {
        let (mut pack, offsets) = build_pack(&[Entry::Flat(Kind::Blob, b"x".to_vec())]);
        // Rewrite the type bits to the reserved code 5.
        let at = offsets[0] as usize;
        pack[at] = (pack[at] & 0x8f) | (5 << 4);
        reseal(&mut pack);

        let mut scanner = Scanner::new(&pack[..]);
        scanner.header().unwrap();
        assert!(matches!(
            scanner.next_object_header(),
            Err(PackError::MalformedHeader(_))
        ));
    }
}
